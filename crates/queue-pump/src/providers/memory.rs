//! In-memory queue implementation for testing and development.
//!
//! This module provides a fully functional in-memory entity that:
//! - Supports session-based ordered message delivery with exclusive locks
//! - Implements peek-lock tokens with expiry and redelivery
//! - Simulates dead-letter queue behavior, including max-delivery-count
//! - Provides thread-safe concurrent access
//!
//! It is intended for unit testing of pump consumers, development and
//! prototyping, and as the reference implementation of the receiver
//! capabilities. Nothing is persisted; queues live and die with the process.

use crate::error::PumpError;
use crate::message::{
    EntityPath, LockToken, Message, MessageId, ReceivedMessage, SessionId, Timestamp,
};
use crate::receiver::{
    MessageReceiver, PropertyMap, ReceiveMode, ReceiverFactory, SessionReceiver,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Pacing of the receive/accept polling loops
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Attribute stamped onto dead-lettered messages
const DEAD_LETTER_REASON_ATTRIBUTE: &str = "DeadLetterReason";
const DEAD_LETTER_DESCRIPTION_ATTRIBUTE: &str = "DeadLetterErrorDescription";

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// In-memory queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Peek-lock validity per message delivery
    pub message_lock_duration: Duration,
    /// Session lock validity per acceptance or renewal
    pub session_lock_duration: Duration,
    /// How long an accept waits for a session to become available
    pub accept_session_timeout: Duration,
    /// Deliveries after which a message is dead-lettered instead of requeued
    pub max_delivery_count: u32,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            message_lock_duration: Duration::from_secs(30),
            session_lock_duration: Duration::from_secs(60),
            accept_session_timeout: Duration::from_millis(250),
            max_delivery_count: 10,
        }
    }
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in the queue with delivery metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    attributes: HashMap<String, String>,
    session_id: Option<SessionId>,
    enqueued_at: Timestamp,
    delivery_count: u32,
}

impl StoredMessage {
    fn from_message(message: Message, message_id: MessageId) -> Self {
        Self {
            message_id,
            body: message.body,
            attributes: message.attributes,
            session_id: message.session_id,
            enqueued_at: Timestamp::now(),
            delivery_count: 0,
        }
    }

    fn into_received(self, lock_token: LockToken, locked_until: Timestamp) -> ReceivedMessage {
        let received = ReceivedMessage::new(self.message_id, lock_token, locked_until, self.body)
            .with_attributes(self.attributes)
            .with_delivery_count(self.delivery_count)
            .with_enqueued_at(self.enqueued_at);
        match self.session_id {
            Some(session_id) => received.with_session_id(session_id),
            None => received,
        }
    }
}

/// A message delivered under a peek lock
struct InFlightMessage {
    message: StoredMessage,
    lock_expires_at: Timestamp,
    /// Where the message returns on abandon or lock expiry
    from_session: Option<SessionId>,
}

/// Per-session FIFO and exclusive-lock state
struct SessionState {
    messages: VecDeque<StoredMessage>,
    locked_by: Option<u64>,
    lock_expires_at: Option<Timestamp>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            locked_by: None,
            lock_expires_at: None,
        }
    }

    fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }

    fn is_locked_by(&self, client_id: u64) -> bool {
        self.locked_by == Some(client_id)
    }
}

struct QueueState {
    ready: VecDeque<StoredMessage>,
    sessions: HashMap<SessionId, SessionState>,
    in_flight: HashMap<LockToken, InFlightMessage>,
    deferred: Vec<StoredMessage>,
    dead_letter: VecDeque<StoredMessage>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            sessions: HashMap::new(),
            in_flight: HashMap::new(),
            deferred: Vec::new(),
            dead_letter: VecDeque::new(),
        }
    }

    /// Requeue expired peek-locks and release expired session locks
    fn reclaim_expired(&mut self, config: &InMemoryConfig) {
        let now = Timestamp::now();

        let expired: Vec<LockToken> = self
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.lock_expires_at <= now)
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            if let Some(in_flight) = self.in_flight.remove(&token) {
                self.requeue(in_flight.message, in_flight.from_session, config);
            }
        }

        for session in self.sessions.values_mut() {
            let lock_expired = session
                .lock_expires_at
                .as_ref()
                .map(|expires| *expires <= now)
                .unwrap_or(false);
            if lock_expired {
                session.locked_by = None;
                session.lock_expires_at = None;
            }
        }
    }

    /// Return a message to the head of its queue, or dead-letter it when the
    /// delivery count is exhausted
    fn requeue(
        &mut self,
        message: StoredMessage,
        from_session: Option<SessionId>,
        config: &InMemoryConfig,
    ) {
        if message.delivery_count >= config.max_delivery_count {
            let mut message = message;
            message.attributes.insert(
                DEAD_LETTER_REASON_ATTRIBUTE.to_string(),
                "MaxDeliveryCountExceeded".to_string(),
            );
            self.dead_letter.push_back(message);
            return;
        }

        match from_session {
            Some(session_id) => {
                self.sessions
                    .entry(session_id)
                    .or_insert_with(SessionState::new)
                    .messages
                    .push_front(message);
            }
            None => self.ready.push_front(message),
        }
    }

    fn take_in_flight(&mut self, lock_token: &LockToken) -> Result<InFlightMessage, PumpError> {
        self.in_flight
            .remove(lock_token)
            .ok_or_else(|| PumpError::MessageLockLost {
                lock_token: lock_token.to_string(),
            })
    }
}

fn apply_properties(message: &mut StoredMessage, properties: Option<PropertyMap>) {
    if let Some(properties) = properties {
        message.attributes.extend(properties);
    }
}

fn lock_expiry(lock_duration: Duration) -> Timestamp {
    let duration = chrono::Duration::from_std(lock_duration).unwrap_or(chrono::Duration::MAX);
    Timestamp::now().saturating_add(duration)
}

// ============================================================================
// InMemoryQueue
// ============================================================================

/// A single in-memory entity acting as sender handle and receiver factory
#[derive(Clone)]
pub struct InMemoryQueue {
    entity_path: EntityPath,
    config: InMemoryConfig,
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryQueue {
    /// Create a new in-memory entity
    pub fn new(entity_path: EntityPath, config: InMemoryConfig) -> Self {
        Self {
            entity_path,
            config,
            state: Arc::new(Mutex::new(QueueState::new())),
        }
    }

    /// Place a message on the entity, routed to its session when one is set
    pub async fn send(&self, message: Message) -> MessageId {
        let message_id = MessageId::new();
        let stored = StoredMessage::from_message(message, message_id.clone());

        let mut state = self.state.lock().await;
        match stored.session_id.clone() {
            Some(session_id) => {
                state
                    .sessions
                    .entry(session_id)
                    .or_insert_with(SessionState::new)
                    .messages
                    .push_back(stored);
            }
            None => state.ready.push_back(stored),
        }
        message_id
    }

    /// Number of messages waiting for delivery (ready plus all sessions)
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len()
            + state
                .sessions
                .values()
                .map(|session| session.messages.len())
                .sum::<usize>()
    }

    /// Check if no messages are waiting for delivery
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of messages in the dead-letter queue
    pub async fn dead_letter_len(&self) -> usize {
        self.state.lock().await.dead_letter.len()
    }

    /// Number of messages delivered under an outstanding peek lock
    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Number of messages set aside by deferral
    pub async fn deferred_len(&self) -> usize {
        self.state.lock().await.deferred.len()
    }

    fn check_entity_path(&self, entity_path: &EntityPath) -> Result<(), PumpError> {
        if entity_path != &self.entity_path {
            return Err(PumpError::ProviderError {
                provider: "InMemory".to_string(),
                code: "EntityNotFound".to_string(),
                message: format!("unknown entity path: {}", entity_path),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ReceiverFactory for InMemoryQueue {
    async fn create_receiver(
        &self,
        entity_path: &EntityPath,
        mode: ReceiveMode,
    ) -> Result<Arc<dyn MessageReceiver>, PumpError> {
        self.check_entity_path(entity_path)?;
        Ok(Arc::new(InMemoryReceiver {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            mode,
            closed: AtomicBool::new(false),
        }))
    }

    async fn accept_session(
        &self,
        entity_path: &EntityPath,
        session_id: Option<SessionId>,
        mode: ReceiveMode,
    ) -> Result<Arc<dyn SessionReceiver>, PumpError> {
        self.check_entity_path(entity_path)?;

        let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        let deadline = tokio::time::Instant::now() + self.config.accept_session_timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                state.reclaim_expired(&self.config);

                let candidate = match &session_id {
                    // A requested session need not exist yet
                    Some(requested) => {
                        let session = state
                            .sessions
                            .entry(requested.clone())
                            .or_insert_with(SessionState::new);
                        (!session.is_locked()).then(|| requested.clone())
                    }
                    // Any-session accept picks a session with pending messages
                    None => state
                        .sessions
                        .iter()
                        .find(|(_, session)| !session.is_locked() && !session.messages.is_empty())
                        .map(|(id, _)| id.clone()),
                };

                if let Some(accepted) = candidate {
                    let locked_until = lock_expiry(self.config.session_lock_duration);
                    if let Some(session) = state.sessions.get_mut(&accepted) {
                        session.locked_by = Some(client_id);
                        session.lock_expires_at = Some(locked_until.clone());
                    }
                    return Ok(Arc::new(InMemorySessionReceiver {
                        config: self.config.clone(),
                        state: Arc::clone(&self.state),
                        mode,
                        session_id: accepted,
                        client_id,
                        accepted_locked_until: locked_until,
                        closed: AtomicBool::new(false),
                    }));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(PumpError::Timeout {
                    duration: chrono::Duration::from_std(self.config.accept_session_timeout)
                        .unwrap_or(chrono::Duration::MAX),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

// ============================================================================
// InMemoryReceiver
// ============================================================================

struct InMemoryReceiver {
    config: InMemoryConfig,
    state: Arc<Mutex<QueueState>>,
    mode: ReceiveMode,
    closed: AtomicBool,
}

impl InMemoryReceiver {
    fn check_open(&self) -> Result<(), PumpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PumpError::OperationCancelled {
                message: "receiver is closed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    async fn receive(&self, timeout: chrono::Duration) -> Result<Option<ReceivedMessage>, PumpError> {
        self.check_open()?;
        let deadline = tokio::time::Instant::now() + timeout.to_std().unwrap_or_default();
        loop {
            {
                let mut state = self.state.lock().await;
                state.reclaim_expired(&self.config);
                if let Some(mut message) = state.ready.pop_front() {
                    message.delivery_count += 1;
                    let lock_token = LockToken::new();
                    return Ok(Some(match self.mode {
                        ReceiveMode::PeekLock => {
                            let locked_until = lock_expiry(self.config.message_lock_duration);
                            state.in_flight.insert(
                                lock_token,
                                InFlightMessage {
                                    message: message.clone(),
                                    lock_expires_at: locked_until.clone(),
                                    from_session: None,
                                },
                            );
                            message.into_received(lock_token, locked_until)
                        }
                        ReceiveMode::ReceiveAndDelete => {
                            message.into_received(lock_token, Timestamp::now())
                        }
                    }));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn complete(&self, lock_token: &LockToken) -> Result<(), PumpError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        state.take_in_flight(lock_token).map(|_| ())
    }

    async fn abandon(
        &self,
        lock_token: &LockToken,
        properties_to_modify: Option<PropertyMap>,
    ) -> Result<(), PumpError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        let mut in_flight = state.take_in_flight(lock_token)?;
        apply_properties(&mut in_flight.message, properties_to_modify);
        state.requeue(in_flight.message, in_flight.from_session, &self.config);
        Ok(())
    }

    async fn defer(
        &self,
        lock_token: &LockToken,
        properties_to_modify: Option<PropertyMap>,
    ) -> Result<(), PumpError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        let mut in_flight = state.take_in_flight(lock_token)?;
        apply_properties(&mut in_flight.message, properties_to_modify);
        state.deferred.push(in_flight.message);
        Ok(())
    }

    async fn dead_letter(
        &self,
        lock_token: &LockToken,
        reason: Option<String>,
        description: Option<String>,
        properties_to_modify: Option<PropertyMap>,
    ) -> Result<(), PumpError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        let mut in_flight = state.take_in_flight(lock_token)?;
        apply_properties(&mut in_flight.message, properties_to_modify);
        if let Some(reason) = reason {
            in_flight
                .message
                .attributes
                .insert(DEAD_LETTER_REASON_ATTRIBUTE.to_string(), reason);
        }
        if let Some(description) = description {
            in_flight
                .message
                .attributes
                .insert(DEAD_LETTER_DESCRIPTION_ATTRIBUTE.to_string(), description);
        }
        state.dead_letter.push_back(in_flight.message);
        Ok(())
    }

    async fn renew_message_lock(&self, message: &ReceivedMessage) -> Result<Timestamp, PumpError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        state.reclaim_expired(&self.config);
        let in_flight = state.in_flight.get_mut(message.lock_token()).ok_or_else(|| {
            PumpError::MessageLockLost {
                lock_token: message.lock_token().to_string(),
            }
        })?;
        let locked_until = lock_expiry(self.config.message_lock_duration);
        in_flight.lock_expires_at = locked_until.clone();
        Ok(locked_until)
    }

    async fn close(&self) -> Result<(), PumpError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn receive_mode(&self) -> ReceiveMode {
        self.mode
    }
}

// ============================================================================
// InMemorySessionReceiver
// ============================================================================

struct InMemorySessionReceiver {
    config: InMemoryConfig,
    state: Arc<Mutex<QueueState>>,
    mode: ReceiveMode,
    session_id: SessionId,
    client_id: u64,
    accepted_locked_until: Timestamp,
    closed: AtomicBool,
}

impl InMemorySessionReceiver {
    fn check_open(&self) -> Result<(), PumpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PumpError::OperationCancelled {
                message: "session receiver is closed".to_string(),
            });
        }
        Ok(())
    }

    fn check_lock_held(&self, state: &QueueState) -> Result<(), PumpError> {
        let holds_lock = state
            .sessions
            .get(&self.session_id)
            .map(|session| session.is_locked_by(self.client_id))
            .unwrap_or(false);
        if !holds_lock {
            return Err(PumpError::SessionLockLost {
                session_id: self.session_id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageReceiver for InMemorySessionReceiver {
    async fn receive(&self, timeout: chrono::Duration) -> Result<Option<ReceivedMessage>, PumpError> {
        self.check_open()?;
        let deadline = tokio::time::Instant::now() + timeout.to_std().unwrap_or_default();
        loop {
            {
                let mut state = self.state.lock().await;
                state.reclaim_expired(&self.config);
                self.check_lock_held(&state)?;

                let next = state
                    .sessions
                    .get_mut(&self.session_id)
                    .and_then(|session| session.messages.pop_front());
                if let Some(mut message) = next {
                    message.delivery_count += 1;
                    let lock_token = LockToken::new();
                    return Ok(Some(match self.mode {
                        ReceiveMode::PeekLock => {
                            let locked_until = lock_expiry(self.config.message_lock_duration);
                            state.in_flight.insert(
                                lock_token,
                                InFlightMessage {
                                    message: message.clone(),
                                    lock_expires_at: locked_until.clone(),
                                    from_session: Some(self.session_id.clone()),
                                },
                            );
                            message.into_received(lock_token, locked_until)
                        }
                        ReceiveMode::ReceiveAndDelete => {
                            message.into_received(lock_token, Timestamp::now())
                        }
                    }));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn complete(&self, lock_token: &LockToken) -> Result<(), PumpError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        self.check_lock_held(&state)?;
        state.take_in_flight(lock_token).map(|_| ())
    }

    async fn abandon(
        &self,
        lock_token: &LockToken,
        properties_to_modify: Option<PropertyMap>,
    ) -> Result<(), PumpError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        self.check_lock_held(&state)?;
        let mut in_flight = state.take_in_flight(lock_token)?;
        apply_properties(&mut in_flight.message, properties_to_modify);
        state.requeue(in_flight.message, in_flight.from_session, &self.config);
        Ok(())
    }

    async fn defer(
        &self,
        lock_token: &LockToken,
        properties_to_modify: Option<PropertyMap>,
    ) -> Result<(), PumpError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        self.check_lock_held(&state)?;
        let mut in_flight = state.take_in_flight(lock_token)?;
        apply_properties(&mut in_flight.message, properties_to_modify);
        state.deferred.push(in_flight.message);
        Ok(())
    }

    async fn dead_letter(
        &self,
        lock_token: &LockToken,
        reason: Option<String>,
        description: Option<String>,
        properties_to_modify: Option<PropertyMap>,
    ) -> Result<(), PumpError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        self.check_lock_held(&state)?;
        let mut in_flight = state.take_in_flight(lock_token)?;
        apply_properties(&mut in_flight.message, properties_to_modify);
        if let Some(reason) = reason {
            in_flight
                .message
                .attributes
                .insert(DEAD_LETTER_REASON_ATTRIBUTE.to_string(), reason);
        }
        if let Some(description) = description {
            in_flight
                .message
                .attributes
                .insert(DEAD_LETTER_DESCRIPTION_ATTRIBUTE.to_string(), description);
        }
        state.dead_letter.push_back(in_flight.message);
        Ok(())
    }

    async fn renew_message_lock(&self, message: &ReceivedMessage) -> Result<Timestamp, PumpError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        self.check_lock_held(&state)?;
        let in_flight = state.in_flight.get_mut(message.lock_token()).ok_or_else(|| {
            PumpError::MessageLockLost {
                lock_token: message.lock_token().to_string(),
            }
        })?;
        let locked_until = lock_expiry(self.config.message_lock_duration);
        in_flight.lock_expires_at = locked_until.clone();
        Ok(locked_until)
    }

    async fn close(&self) -> Result<(), PumpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.get_mut(&self.session_id) {
            if session.is_locked_by(self.client_id) {
                session.locked_by = None;
                session.lock_expires_at = None;
            }
        }
        Ok(())
    }

    fn receive_mode(&self) -> ReceiveMode {
        self.mode
    }
}

#[async_trait]
impl SessionReceiver for InMemorySessionReceiver {
    async fn renew_session_lock(&self) -> Result<Timestamp, PumpError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        self.check_lock_held(&state)?;
        let locked_until = lock_expiry(self.config.session_lock_duration);
        if let Some(session) = state.sessions.get_mut(&self.session_id) {
            session.lock_expires_at = Some(locked_until.clone());
        }
        Ok(locked_until)
    }

    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn locked_until(&self) -> Timestamp {
        self.accepted_locked_until.clone()
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
