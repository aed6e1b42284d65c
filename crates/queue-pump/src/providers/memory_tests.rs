//! Tests for the in-memory provider.

use super::*;
use crate::receiver::{MessageReceiver, ReceiverFactory};

fn entity_path() -> EntityPath {
    EntityPath::new("orders-inbound".to_string()).unwrap()
}

fn queue() -> InMemoryQueue {
    InMemoryQueue::new(entity_path(), InMemoryConfig::default())
}

fn queue_with(config: InMemoryConfig) -> InMemoryQueue {
    InMemoryQueue::new(entity_path(), config)
}

fn short_wait() -> chrono::Duration {
    chrono::Duration::milliseconds(50)
}

async fn peek_lock_receiver(queue: &InMemoryQueue) -> Arc<dyn MessageReceiver> {
    queue
        .create_receiver(&entity_path(), ReceiveMode::PeekLock)
        .await
        .unwrap()
}

// ============================================================================
// Queue Receive Tests
// ============================================================================

mod receive_tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_are_delivered_in_fifo_order() {
        // Arrange
        let queue = queue();
        queue.send(Message::new("first".into())).await;
        queue.send(Message::new("second".into())).await;
        let receiver = peek_lock_receiver(&queue).await;

        // Act
        let first = receiver.receive(short_wait()).await.unwrap().unwrap();
        let second = receiver.receive(short_wait()).await.unwrap().unwrap();

        // Assert
        assert_eq!(first.body().as_ref(), b"first");
        assert_eq!(second.body().as_ref(), b"second");
        assert_eq!(first.delivery_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_returns_none_after_timeout() {
        let queue = queue();
        let receiver = peek_lock_receiver(&queue).await;

        let result = receiver.receive(short_wait()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_receive_and_delete_removes_message_at_delivery() {
        // Arrange
        let queue = queue();
        queue.send(Message::new("payload".into())).await;
        let receiver = queue
            .create_receiver(&entity_path(), ReceiveMode::ReceiveAndDelete)
            .await
            .unwrap();

        // Act
        let message = receiver.receive(short_wait()).await.unwrap();

        // Assert - nothing is left behind, locked or otherwise
        assert!(message.is_some());
        assert!(queue.is_empty().await);
        assert_eq!(queue.in_flight_len().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_entity_path_is_rejected() {
        let queue = queue();
        let other = EntityPath::new("billing-inbound".to_string()).unwrap();

        let result = queue.create_receiver(&other, ReceiveMode::PeekLock).await;
        assert!(matches!(result, Err(PumpError::ProviderError { .. })));
    }

    #[tokio::test]
    async fn test_closed_receiver_rejects_receive() {
        let queue = queue();
        let receiver = peek_lock_receiver(&queue).await;
        receiver.close().await.unwrap();

        let result = receiver.receive(short_wait()).await;
        assert!(matches!(result, Err(PumpError::OperationCancelled { .. })));
    }
}

// ============================================================================
// Disposition Tests
// ============================================================================

mod disposition_tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_settles_message() {
        // Arrange
        let queue = queue();
        queue.send(Message::new("payload".into())).await;
        let receiver = peek_lock_receiver(&queue).await;
        let message = receiver.receive(short_wait()).await.unwrap().unwrap();

        // Act
        receiver.complete(message.lock_token()).await.unwrap();

        // Assert
        assert!(queue.is_empty().await);
        assert_eq!(queue.in_flight_len().await, 0);
        assert!(receiver.receive(short_wait()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_with_unknown_token_reports_lock_lost() {
        let queue = queue();
        let receiver = peek_lock_receiver(&queue).await;

        let result = receiver.complete(&LockToken::new()).await;
        assert!(matches!(result, Err(PumpError::MessageLockLost { .. })));
    }

    #[tokio::test]
    async fn test_abandon_redelivers_with_incremented_count() {
        // Arrange
        let queue = queue();
        queue.send(Message::new("payload".into())).await;
        let receiver = peek_lock_receiver(&queue).await;
        let first = receiver.receive(short_wait()).await.unwrap().unwrap();
        assert_eq!(first.delivery_count(), 1);

        // Act
        receiver.abandon(first.lock_token(), None).await.unwrap();
        let second = receiver.receive(short_wait()).await.unwrap().unwrap();

        // Assert
        assert_eq!(second.message_id(), first.message_id());
        assert_eq!(second.delivery_count(), 2);
    }

    #[tokio::test]
    async fn test_abandon_applies_property_modifications() {
        // Arrange
        let queue = queue();
        queue.send(Message::new("payload".into())).await;
        let receiver = peek_lock_receiver(&queue).await;
        let message = receiver.receive(short_wait()).await.unwrap().unwrap();

        let mut properties = PropertyMap::new();
        properties.insert("abandon-cause".to_string(), "downstream busy".to_string());

        // Act
        receiver
            .abandon(message.lock_token(), Some(properties))
            .await
            .unwrap();
        let redelivered = receiver.receive(short_wait()).await.unwrap().unwrap();

        // Assert
        assert_eq!(
            redelivered.attributes().get("abandon-cause"),
            Some(&"downstream busy".to_string())
        );
    }

    #[tokio::test]
    async fn test_abandon_past_max_delivery_count_dead_letters() {
        // Arrange - a single delivery exhausts the budget
        let queue = queue_with(InMemoryConfig {
            max_delivery_count: 1,
            ..Default::default()
        });
        queue.send(Message::new("poison".into())).await;
        let receiver = peek_lock_receiver(&queue).await;
        let message = receiver.receive(short_wait()).await.unwrap().unwrap();

        // Act
        receiver.abandon(message.lock_token(), None).await.unwrap();

        // Assert
        assert!(queue.is_empty().await);
        assert_eq!(queue.dead_letter_len().await, 1);
    }

    #[tokio::test]
    async fn test_defer_hides_message_from_regular_receives() {
        // Arrange
        let queue = queue();
        queue.send(Message::new("payload".into())).await;
        let receiver = peek_lock_receiver(&queue).await;
        let message = receiver.receive(short_wait()).await.unwrap().unwrap();

        // Act
        receiver.defer(message.lock_token(), None).await.unwrap();

        // Assert
        assert!(receiver.receive(short_wait()).await.unwrap().is_none());
        assert_eq!(queue.in_flight_len().await, 0);
        assert_eq!(queue.deferred_len().await, 1);
        assert_eq!(queue.dead_letter_len().await, 0);
    }

    #[tokio::test]
    async fn test_dead_letter_records_reason_and_description() {
        // Arrange
        let queue = queue();
        queue.send(Message::new("payload".into())).await;
        let receiver = peek_lock_receiver(&queue).await;
        let message = receiver.receive(short_wait()).await.unwrap().unwrap();

        // Act
        receiver
            .dead_letter(
                message.lock_token(),
                Some("ValidationFailed".to_string()),
                Some("missing order id".to_string()),
                None,
            )
            .await
            .unwrap();

        // Assert
        assert_eq!(queue.dead_letter_len().await, 1);
        assert!(queue.is_empty().await);
    }
}

// ============================================================================
// Lock Lifetime Tests
// ============================================================================

mod lock_tests {
    use super::*;

    #[tokio::test]
    async fn test_renew_extends_message_lock() {
        // Arrange
        let queue = queue();
        queue.send(Message::new("payload".into())).await;
        let receiver = peek_lock_receiver(&queue).await;
        let message = receiver.receive(short_wait()).await.unwrap().unwrap();

        // Act
        let renewed_until = receiver.renew_message_lock(&message).await.unwrap();

        // Assert
        assert!(renewed_until >= message.locked_until());
    }

    #[tokio::test]
    async fn test_renew_after_complete_reports_lock_lost() {
        let queue = queue();
        queue.send(Message::new("payload".into())).await;
        let receiver = peek_lock_receiver(&queue).await;
        let message = receiver.receive(short_wait()).await.unwrap().unwrap();
        receiver.complete(message.lock_token()).await.unwrap();

        let result = receiver.renew_message_lock(&message).await;
        assert!(matches!(result, Err(PumpError::MessageLockLost { .. })));
    }

    #[tokio::test]
    async fn test_expired_lock_requeues_message() {
        // Arrange - a lock short enough to expire during the test
        let queue = queue_with(InMemoryConfig {
            message_lock_duration: Duration::from_millis(50),
            ..Default::default()
        });
        queue.send(Message::new("payload".into())).await;
        let receiver = peek_lock_receiver(&queue).await;
        let first = receiver.receive(short_wait()).await.unwrap().unwrap();

        // Act - let the lock lapse without disposing
        tokio::time::sleep(Duration::from_millis(120)).await;
        let second = receiver
            .receive(chrono::Duration::milliseconds(200))
            .await
            .unwrap()
            .unwrap();

        // Assert
        assert_eq!(second.message_id(), first.message_id());
        assert_eq!(second.delivery_count(), 2);
    }
}

// ============================================================================
// Session Tests
// ============================================================================

mod session_tests {
    use super::*;

    fn session_id(id: &str) -> SessionId {
        SessionId::new(id.to_string()).unwrap()
    }

    async fn send_to_session(queue: &InMemoryQueue, session: &str, body: &str) {
        queue
            .send(
                Message::new(Bytes::copy_from_slice(body.as_bytes()))
                    .with_session_id(session_id(session)),
            )
            .await;
    }

    #[tokio::test]
    async fn test_sessioned_messages_bypass_plain_receivers() {
        // Arrange
        let queue = queue();
        send_to_session(&queue, "order-1", "payload").await;
        let receiver = peek_lock_receiver(&queue).await;

        // Act / Assert
        assert!(receiver.receive(short_wait()).await.unwrap().is_none());
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_any_session_accept_picks_session_with_messages() {
        // Arrange
        let queue = queue();
        send_to_session(&queue, "order-1", "payload").await;

        // Act
        let session = queue
            .accept_session(&entity_path(), None, ReceiveMode::PeekLock)
            .await
            .unwrap();

        // Assert
        assert_eq!(session.session_id(), &session_id("order-1"));
        let message = session.receive(short_wait()).await.unwrap().unwrap();
        assert_eq!(message.session_id(), Some(&session_id("order-1")));
    }

    #[tokio::test]
    async fn test_accept_times_out_when_no_session_available() {
        let queue = queue();

        let result = queue
            .accept_session(&entity_path(), None, ReceiveMode::PeekLock)
            .await;
        assert!(matches!(result, Err(PumpError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_requested_session_is_accepted_even_when_empty() {
        let queue = queue();

        let session = queue
            .accept_session(
                &entity_path(),
                Some(session_id("order-9")),
                ReceiveMode::PeekLock,
            )
            .await
            .unwrap();

        assert_eq!(session.session_id(), &session_id("order-9"));
        assert!(session.receive(short_wait()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_lock_is_exclusive_until_closed() {
        // Arrange
        let queue = queue();
        send_to_session(&queue, "order-1", "payload").await;
        let first = queue
            .accept_session(&entity_path(), None, ReceiveMode::PeekLock)
            .await
            .unwrap();

        // Act - the locked session is invisible to a second accept
        let contended = queue
            .accept_session(&entity_path(), None, ReceiveMode::PeekLock)
            .await;
        assert!(matches!(contended, Err(PumpError::Timeout { .. })));

        // A message must remain so the session is still eligible after close
        first.close().await.unwrap();
        let second = queue
            .accept_session(&entity_path(), None, ReceiveMode::PeekLock)
            .await;

        // Assert
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_session_receive_preserves_order_across_abandon() {
        // Arrange
        let queue = queue();
        send_to_session(&queue, "order-1", "first").await;
        send_to_session(&queue, "order-1", "second").await;
        let session = queue
            .accept_session(&entity_path(), None, ReceiveMode::PeekLock)
            .await
            .unwrap();

        // Act - abandon the head of the session queue
        let head = session.receive(short_wait()).await.unwrap().unwrap();
        assert_eq!(head.body().as_ref(), b"first");
        session.abandon(head.lock_token(), None).await.unwrap();

        // Assert - the abandoned message comes back before its successor
        let redelivered = session.receive(short_wait()).await.unwrap().unwrap();
        assert_eq!(redelivered.body().as_ref(), b"first");
        let next = session.receive(short_wait()).await.unwrap().unwrap();
        assert_eq!(next.body().as_ref(), b"second");
    }

    #[tokio::test]
    async fn test_renew_extends_session_lock() {
        let queue = queue();
        send_to_session(&queue, "order-1", "payload").await;
        let session = queue
            .accept_session(&entity_path(), None, ReceiveMode::PeekLock)
            .await
            .unwrap();

        let renewed_until = session.renew_session_lock().await.unwrap();
        assert!(renewed_until >= session.locked_until());
    }

    #[tokio::test]
    async fn test_expired_session_lock_reports_lock_lost() {
        // Arrange - session lock lapses while the consumer is idle
        let queue = queue_with(InMemoryConfig {
            session_lock_duration: Duration::from_millis(50),
            ..Default::default()
        });
        send_to_session(&queue, "order-1", "payload").await;
        let session = queue
            .accept_session(&entity_path(), None, ReceiveMode::PeekLock)
            .await
            .unwrap();

        // Act
        tokio::time::sleep(Duration::from_millis(120)).await;
        let result = session.receive(short_wait()).await;

        // Assert
        assert!(matches!(result, Err(PumpError::SessionLockLost { .. })));
    }
}
