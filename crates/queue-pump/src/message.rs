//! Message types and core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated path of a broker entity (queue or subscription).
///
/// Paths are 1-260 characters of ASCII alphanumerics, hyphens, underscores,
/// and forward slashes (for subscription paths such as
/// `orders/subscriptions/billing`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityPath(String);

impl EntityPath {
    /// Create new entity path with validation
    pub fn new(path: String) -> Result<Self, ValidationError> {
        // Validate length
        if path.is_empty() || path.len() > 260 {
            return Err(ValidationError::OutOfRange {
                field: "entity_path".to_string(),
                message: "must be 1-260 characters".to_string(),
            });
        }

        // Validate characters
        if !path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '/')
        {
            return Err(ValidationError::InvalidFormat {
                field: "entity_path".to_string(),
                message: "only ASCII alphanumeric, hyphens, underscores, and slashes allowed"
                    .to_string(),
            });
        }

        // Validate segment boundaries
        if path.starts_with('-')
            || path.ends_with('-')
            || path.contains("--")
            || path.starts_with('/')
            || path.ends_with('/')
            || path.contains("//")
        {
            return Err(ValidationError::InvalidFormat {
                field: "entity_path".to_string(),
                message: "no leading/trailing or consecutive hyphens and slashes".to_string(),
            });
        }

        Ok(Self(path))
    }

    /// Get entity path as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityPath {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Identifier of a broker-side session (FIFO partition with an exclusive lock)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create new session ID with validation
    pub fn new(id: String) -> Result<Self, ValidationError> {
        if id.is_empty() {
            return Err(ValidationError::Required {
                field: "session_id".to_string(),
            });
        }

        if id.len() > 128 {
            return Err(ValidationError::OutOfRange {
                field: "session_id".to_string(),
                message: "maximum 128 characters".to_string(),
            });
        }

        // Validate ASCII printable characters only
        if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
            return Err(ValidationError::InvalidFormat {
                field: "session_id".to_string(),
                message: "only ASCII printable characters allowed".to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Get session ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Opaque token the broker associates with a single held message lock.
///
/// Required for disposition (complete/abandon/defer/dead-letter) in peek-lock
/// mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(uuid::Uuid);

impl LockToken {
    /// Generate new random lock token
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create lock token from an existing UUID
    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LockToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = uuid::Uuid::parse_str(s).map_err(|_| ValidationError::InvalidFormat {
            field: "lock_token".to_string(),
            message: "must be a valid UUID".to_string(),
        })?;
        Ok(Self(id))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Add a duration, clamping at the maximum representable instant
    pub fn saturating_add(&self, duration: chrono::Duration) -> Self {
        Self(
            self.0
                .checked_add_signed(duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Messages
// ============================================================================

/// A message to be placed on an entity (used by providers and tests; the
/// pump itself only consumes)
#[derive(Debug, Clone)]
pub struct Message {
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub session_id: Option<SessionId>,
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            attributes: HashMap::new(),
            session_id: None,
        }
    }

    /// Add session ID for ordered processing
    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Add message attribute
    pub fn with_attribute(mut self, key: String, value: String) -> Self {
        self.attributes.insert(key, value);
        self
    }
}

/// A message received from the broker with processing metadata.
///
/// The pump treats the payload as opaque; it only reads the identity, the
/// lock token, and the locked-until instant.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    message_id: MessageId,
    lock_token: LockToken,
    locked_until: Timestamp,
    body: Bytes,
    attributes: HashMap<String, String>,
    session_id: Option<SessionId>,
    delivery_count: u32,
    enqueued_at: Timestamp,
    delivered_at: Timestamp,
}

impl ReceivedMessage {
    /// Create a received message with the fields the pump requires
    pub fn new(
        message_id: MessageId,
        lock_token: LockToken,
        locked_until: Timestamp,
        body: Bytes,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            message_id,
            lock_token,
            locked_until,
            body,
            attributes: HashMap::new(),
            session_id: None,
            delivery_count: 1,
            enqueued_at: now.clone(),
            delivered_at: now,
        }
    }

    /// Attach the owning session ID
    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Attach message attributes
    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set the delivery count
    pub fn with_delivery_count(mut self, delivery_count: u32) -> Self {
        self.delivery_count = delivery_count;
        self
    }

    /// Set the enqueue timestamp
    pub fn with_enqueued_at(mut self, enqueued_at: Timestamp) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }

    /// Get message ID
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Get the lock token for disposition
    pub fn lock_token(&self) -> &LockToken {
        &self.lock_token
    }

    /// Get the instant the message lock expires
    pub fn locked_until(&self) -> Timestamp {
        self.locked_until.clone()
    }

    /// Get message body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get message attributes
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Get the owning session ID, if any
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Get the delivery count
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// Get the enqueue timestamp
    pub fn enqueued_at(&self) -> Timestamp {
        self.enqueued_at.clone()
    }

    /// Get the delivery timestamp
    pub fn delivered_at(&self) -> Timestamp {
        self.delivered_at.clone()
    }

    /// Check if message has exceeded maximum delivery count
    pub fn has_exceeded_max_delivery_count(&self, max_count: u32) -> bool {
        self.delivery_count > max_count
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
