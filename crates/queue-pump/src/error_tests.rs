//! Tests for error types.

use super::*;

#[test]
fn test_error_transience() {
    assert!(PumpError::Timeout {
        duration: Duration::seconds(60),
    }
    .is_transient());

    assert!(PumpError::ConnectionFailed {
        message: "network error".to_string(),
    }
    .is_transient());

    assert!(PumpError::ProviderError {
        provider: "InMemory".to_string(),
        code: "Throttled".to_string(),
        message: "busy".to_string(),
    }
    .is_transient());

    assert!(!PumpError::OperationCancelled {
        message: "entity deleted".to_string(),
    }
    .is_transient());

    assert!(!PumpError::MessageLockLost {
        lock_token: "token".to_string(),
    }
    .is_transient());

    assert!(!PumpError::UnsupportedOperation {
        message: "already registered".to_string(),
    }
    .is_transient());
}

#[test]
fn test_lock_lost_classification() {
    assert!(PumpError::MessageLockLost {
        lock_token: "token".to_string(),
    }
    .is_lock_lost());

    assert!(PumpError::SessionLockLost {
        session_id: "session-1".to_string(),
    }
    .is_lock_lost());

    assert!(!PumpError::Timeout {
        duration: Duration::seconds(60),
    }
    .is_lock_lost());
}

#[test]
fn test_terminal_for_renewal() {
    // Renewing a lost lock or a cancelled entity is pointless
    assert!(PumpError::MessageLockLost {
        lock_token: "token".to_string(),
    }
    .is_terminal_for_renewal());

    assert!(PumpError::SessionLockLost {
        session_id: "session-1".to_string(),
    }
    .is_terminal_for_renewal());

    assert!(PumpError::OperationCancelled {
        message: "entity deleted".to_string(),
    }
    .is_terminal_for_renewal());

    // Transient failures keep the renewal loop alive
    assert!(!PumpError::ConnectionFailed {
        message: "network error".to_string(),
    }
    .is_terminal_for_renewal());

    assert!(!PumpError::Timeout {
        duration: Duration::seconds(60),
    }
    .is_terminal_for_renewal());
}

#[test]
fn test_terminal_for_acceptance() {
    assert!(PumpError::OperationCancelled {
        message: "entity deleted".to_string(),
    }
    .is_terminal_for_acceptance());

    assert!(!PumpError::Timeout {
        duration: Duration::seconds(60),
    }
    .is_terminal_for_acceptance());

    assert!(!PumpError::ConnectionFailed {
        message: "network error".to_string(),
    }
    .is_terminal_for_acceptance());
}

#[test]
fn test_error_display() {
    let error = PumpError::SessionLockLost {
        session_id: "orders-42".to_string(),
    };
    assert_eq!(error.to_string(), "Session lock lost for session 'orders-42'");

    let error = PumpError::UnsupportedOperation {
        message: "pump is closed".to_string(),
    };
    assert_eq!(error.to_string(), "Operation not supported: pump is closed");
}

#[test]
fn test_validation_error_conversion() {
    let validation = ValidationError::OutOfRange {
        field: "max_concurrent_calls".to_string(),
        message: "must be at least 1".to_string(),
    };

    let error: PumpError = validation.into();
    assert!(matches!(error, PumpError::ValidationError(_)));
    assert!(!error.is_transient());
}
