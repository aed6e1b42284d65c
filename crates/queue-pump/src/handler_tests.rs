//! Tests for handler contracts and registration options.

use super::*;
use std::sync::Mutex;

// ============================================================================
// Test Handlers
// ============================================================================

/// Records every fault reported through the sink
struct RecordingMessageHandler {
    notifications: Mutex<Vec<ExceptionPhase>>,
}

impl RecordingMessageHandler {
    fn new() -> Self {
        Self {
            notifications: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MessageHandler for RecordingMessageHandler {
    async fn on_message(&self, _message: ReceivedMessage) -> Result<(), CallbackError> {
        Ok(())
    }

    fn notify_exception(&self, _error: &PumpError, phase: ExceptionPhase) {
        self.notifications.lock().unwrap().push(phase);
    }
}

struct RecordingSessionHandler {
    notifications: Mutex<Vec<ExceptionPhase>>,
}

impl RecordingSessionHandler {
    fn new() -> Self {
        Self {
            notifications: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SessionHandler for RecordingSessionHandler {
    async fn on_message(
        &self,
        _session: Arc<dyn SessionReceiver>,
        _message: ReceivedMessage,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    async fn on_close_session(
        &self,
        _session: Arc<dyn SessionReceiver>,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    fn notify_exception(&self, _error: &PumpError, phase: ExceptionPhase) {
        self.notifications.lock().unwrap().push(phase);
    }
}

// ============================================================================
// ExceptionPhase Tests
// ============================================================================

#[test]
fn test_exception_phase_display() {
    let phases = [
        (ExceptionPhase::Receive, "Receive"),
        (ExceptionPhase::UserCallback, "UserCallback"),
        (ExceptionPhase::Complete, "Complete"),
        (ExceptionPhase::Abandon, "Abandon"),
        (ExceptionPhase::RenewMessageLock, "RenewMessageLock"),
        (ExceptionPhase::RenewSessionLock, "RenewSessionLock"),
        (ExceptionPhase::AcceptSession, "AcceptSession"),
        (ExceptionPhase::SessionClose, "SessionClose"),
    ];

    for (phase, expected) in phases {
        assert_eq!(phase.to_string(), expected);
    }
}

// ============================================================================
// Options Tests
// ============================================================================

mod message_handler_options_tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = MessageHandlerOptions::default();
        assert_eq!(options.max_concurrent_calls, 1);
        assert!(options.auto_complete);
        assert_eq!(
            options.max_auto_renew_duration,
            Duration::from_secs(5 * 60)
        );
    }

    #[test]
    fn test_new_validates() {
        let options = MessageHandlerOptions::new(4, false, Duration::from_secs(60));
        assert!(options.is_ok());
        let options = options.unwrap();
        assert_eq!(options.max_concurrent_calls, 4);
        assert!(!options.auto_complete);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = MessageHandlerOptions::new(0, true, Duration::from_secs(60));
        assert!(matches!(result, Err(ValidationError::OutOfRange { .. })));
    }
}

mod session_handler_options_tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SessionHandlerOptions::default();
        assert_eq!(options.max_concurrent_sessions, 1);
        assert_eq!(options.max_concurrent_calls_per_session, 1);
        assert!(options.auto_complete);
    }

    #[test]
    fn test_zero_sessions_rejected() {
        let result = SessionHandlerOptions::new(0, 1, true, Duration::from_secs(60));
        assert!(matches!(result, Err(ValidationError::OutOfRange { .. })));
    }

    #[test]
    fn test_zero_workers_per_session_rejected() {
        let result = SessionHandlerOptions::new(1, 0, true, Duration::from_secs(60));
        assert!(matches!(result, Err(ValidationError::OutOfRange { .. })));
    }
}

// ============================================================================
// ExceptionSink Tests
// ============================================================================

#[test]
fn test_sink_dispatches_to_message_handler() {
    let handler = Arc::new(RecordingMessageHandler::new());
    let sink = ExceptionSink::Message(handler.clone());

    let error = PumpError::ConnectionFailed {
        message: "network error".to_string(),
    };
    sink.notify(&error, ExceptionPhase::Receive);

    let notifications = handler.notifications.lock().unwrap();
    assert_eq!(notifications.as_slice(), &[ExceptionPhase::Receive]);
}

#[test]
fn test_sink_dispatches_to_session_handler() {
    let handler = Arc::new(RecordingSessionHandler::new());
    let sink = ExceptionSink::Session(handler.clone());

    let error = PumpError::SessionLockLost {
        session_id: "session-1".to_string(),
    };
    sink.notify(&error, ExceptionPhase::RenewSessionLock);

    let notifications = handler.notifications.lock().unwrap();
    assert_eq!(
        notifications.as_slice(),
        &[ExceptionPhase::RenewSessionLock]
    );
}
