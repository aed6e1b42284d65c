//! Handler contracts and registration options.

use crate::error::{PumpError, ValidationError};
use crate::message::ReceivedMessage;
use crate::receiver::SessionReceiver;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Error type user callbacks may fail with
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Pipeline stage in which a reported fault occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionPhase {
    Receive,
    UserCallback,
    Complete,
    Abandon,
    RenewMessageLock,
    RenewSessionLock,
    AcceptSession,
    SessionClose,
}

impl std::fmt::Display for ExceptionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Receive => "Receive",
            Self::UserCallback => "UserCallback",
            Self::Complete => "Complete",
            Self::Abandon => "Abandon",
            Self::RenewMessageLock => "RenewMessageLock",
            Self::RenewSessionLock => "RenewSessionLock",
            Self::AcceptSession => "AcceptSession",
            Self::SessionClose => "SessionClose",
        };
        write!(f, "{}", name)
    }
}

/// Callbacks for non-sessioned message processing
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message.
    ///
    /// Returning `Err` signals failure; in peek-lock mode the pump abandons
    /// the message so it becomes available for redelivery.
    async fn on_message(&self, message: ReceivedMessage) -> Result<(), CallbackError>;

    /// Fire-and-forget fault sink, tagged with the phase in which the fault
    /// occurred. Implementations must not panic.
    fn notify_exception(&self, error: &PumpError, phase: ExceptionPhase);
}

/// Callbacks for sessioned message processing
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Process one message from the session.
    ///
    /// Disposition must go through `session`; the session holds the lock.
    async fn on_message(
        &self,
        session: Arc<dyn SessionReceiver>,
        message: ReceivedMessage,
    ) -> Result<(), CallbackError>;

    /// Invoked exactly once per accepted session, when every worker has
    /// observed the session as drained and before the session is released
    async fn on_close_session(&self, session: Arc<dyn SessionReceiver>)
        -> Result<(), CallbackError>;

    /// Fire-and-forget fault sink; see [`MessageHandler::notify_exception`]
    fn notify_exception(&self, error: &PumpError, phase: ExceptionPhase);
}

// ============================================================================
// Handler Options
// ============================================================================

const DEFAULT_MAX_AUTO_RENEW: Duration = Duration::from_secs(5 * 60);

/// Options for [`crate::pump::MessageAndSessionPump::register_message_handler`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHandlerOptions {
    /// Maximum number of concurrent user callbacks
    pub max_concurrent_calls: usize,
    /// Complete the message automatically when the callback succeeds
    pub auto_complete: bool,
    /// Wall-clock window from message arrival during which the pump keeps
    /// renewing the message lock
    pub max_auto_renew_duration: Duration,
}

impl Default for MessageHandlerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1,
            auto_complete: true,
            max_auto_renew_duration: DEFAULT_MAX_AUTO_RENEW,
        }
    }
}

impl MessageHandlerOptions {
    /// Create options with validation
    pub fn new(
        max_concurrent_calls: usize,
        auto_complete: bool,
        max_auto_renew_duration: Duration,
    ) -> Result<Self, ValidationError> {
        let options = Self {
            max_concurrent_calls,
            auto_complete,
            max_auto_renew_duration,
        };
        options.validate()?;
        Ok(options)
    }

    /// Validate option values
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_calls == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_concurrent_calls".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Options for [`crate::pump::MessageAndSessionPump::register_session_handler`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHandlerOptions {
    /// Maximum number of concurrently accepted sessions
    pub max_concurrent_sessions: usize,
    /// Maximum number of concurrent user callbacks per accepted session
    pub max_concurrent_calls_per_session: usize,
    /// Complete the message automatically when the callback succeeds
    pub auto_complete: bool,
    /// Wall-clock bound on callback runtime before session lock renewal is
    /// cancelled; also guards the session-close handshake
    pub max_auto_renew_duration: Duration,
}

impl Default for SessionHandlerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 1,
            max_concurrent_calls_per_session: 1,
            auto_complete: true,
            max_auto_renew_duration: DEFAULT_MAX_AUTO_RENEW,
        }
    }
}

impl SessionHandlerOptions {
    /// Create options with validation
    pub fn new(
        max_concurrent_sessions: usize,
        max_concurrent_calls_per_session: usize,
        auto_complete: bool,
        max_auto_renew_duration: Duration,
    ) -> Result<Self, ValidationError> {
        let options = Self {
            max_concurrent_sessions,
            max_concurrent_calls_per_session,
            auto_complete,
            max_auto_renew_duration,
        };
        options.validate()?;
        Ok(options)
    }

    /// Validate option values
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_sessions == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_concurrent_sessions".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_concurrent_calls_per_session == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_concurrent_calls_per_session".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Exception Sink
// ============================================================================

/// Unifies the two handler kinds for code that only reports faults, such as
/// the renewal loops
#[derive(Clone)]
pub(crate) enum ExceptionSink {
    Message(Arc<dyn MessageHandler>),
    Session(Arc<dyn SessionHandler>),
}

impl ExceptionSink {
    pub(crate) fn notify(&self, error: &PumpError, phase: ExceptionPhase) {
        warn!(phase = %phase, error = %error, "pump fault reported to handler");
        match self {
            Self::Message(handler) => handler.notify_exception(error, phase),
            Self::Session(handler) => handler.notify_exception(error, phase),
        }
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
