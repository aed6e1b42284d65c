//! Receiver capabilities the pump consumes.
//!
//! The pump is transport-agnostic: anything that can receive, dispose, and
//! renew locks can drive it. Implementations exist for real brokers outside
//! this crate; [`crate::providers::memory`] ships an in-memory one.

use crate::error::PumpError;
use crate::message::{EntityPath, LockToken, ReceivedMessage, SessionId, Timestamp};
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Properties to stamp onto a message during disposition
pub type PropertyMap = HashMap<String, String>;

/// How messages are handed out by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiveMode {
    /// The broker hands out a message under a time-bounded lock; the consumer
    /// must dispose before the lock expires (at-least-once)
    PeekLock,
    /// The broker removes the message at delivery; no disposition is possible
    /// or required (at-most-once)
    ReceiveAndDelete,
}

impl ReceiveMode {
    /// Check if this mode hands out broker-side locks
    pub fn is_peek_lock(&self) -> bool {
        matches!(self, Self::PeekLock)
    }
}

impl std::fmt::Display for ReceiveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeekLock => write!(f, "PeekLock"),
            Self::ReceiveAndDelete => write!(f, "ReceiveAndDelete"),
        }
    }
}

/// Interface for receiving and disposing messages from an entity
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Receive a single message, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when no message arrived within the timeout.
    async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, PumpError>;

    /// Mark message as successfully processed
    async fn complete(&self, lock_token: &LockToken) -> Result<(), PumpError>;

    /// Return message to the entity for redelivery
    async fn abandon(
        &self,
        lock_token: &LockToken,
        properties_to_modify: Option<PropertyMap>,
    ) -> Result<(), PumpError>;

    /// Set the message aside; it is no longer delivered by regular receives
    async fn defer(
        &self,
        lock_token: &LockToken,
        properties_to_modify: Option<PropertyMap>,
    ) -> Result<(), PumpError>;

    /// Move the message to the dead-letter queue
    async fn dead_letter(
        &self,
        lock_token: &LockToken,
        reason: Option<String>,
        description: Option<String>,
        properties_to_modify: Option<PropertyMap>,
    ) -> Result<(), PumpError>;

    /// Renew the message lock, returning the new locked-until instant
    async fn renew_message_lock(&self, message: &ReceivedMessage) -> Result<Timestamp, PumpError>;

    /// Close the receiver and release transport resources
    async fn close(&self) -> Result<(), PumpError>;

    /// Get the receive mode this receiver was created with
    fn receive_mode(&self) -> ReceiveMode;
}

/// Interface for an accepted session: everything a [`MessageReceiver`] does,
/// scoped to one session, plus the session lock
#[async_trait]
pub trait SessionReceiver: MessageReceiver {
    /// Renew the session lock, returning the new locked-until instant
    async fn renew_session_lock(&self) -> Result<Timestamp, PumpError>;

    /// Get the session ID
    fn session_id(&self) -> &SessionId;

    /// Get the session lock expiry observed at acceptance. Renewals return
    /// the updated expiry from [`renew_session_lock`](Self::renew_session_lock).
    fn locked_until(&self) -> Timestamp;
}

/// Factory for receivers and session acceptance against an entity
#[async_trait]
pub trait ReceiverFactory: Send + Sync {
    /// Create a receiver for the entity
    async fn create_receiver(
        &self,
        entity_path: &EntityPath,
        mode: ReceiveMode,
    ) -> Result<Arc<dyn MessageReceiver>, PumpError>;

    /// Accept a session on the entity.
    ///
    /// With `session_id = None` the broker picks any available session; a
    /// `Timeout` error means no session was available.
    async fn accept_session(
        &self,
        entity_path: &EntityPath,
        session_id: Option<SessionId>,
        mode: ReceiveMode,
    ) -> Result<Arc<dyn SessionReceiver>, PumpError>;
}

#[cfg(test)]
#[path = "receiver_tests.rs"]
mod tests;
