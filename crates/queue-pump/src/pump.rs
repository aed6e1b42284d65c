//! The message and session pump.
//!
//! [`MessageAndSessionPump`] pulls messages from a broker entity through the
//! receiver capabilities and delivers them to the registered handler under
//! bounded concurrency. Non-sessioned and sessioned operation are mutually
//! exclusive: exactly one handler may ever be registered per pump.

use crate::error::PumpError;
use crate::handler::{
    ExceptionPhase, ExceptionSink, MessageHandler, MessageHandlerOptions, SessionHandler,
    SessionHandlerOptions,
};
use crate::message::{EntityPath, LockToken, ReceivedMessage, Timestamp};
use crate::receiver::{MessageReceiver, PropertyMap, ReceiveMode, ReceiverFactory};
use crate::renewal::{MessageLockRenewer, RenewalLoop};
use crate::sessions::{spawn_session_acceptance, SessionPumpContext};
use chrono::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Receive wait per worker iteration. A large value means fewer receive calls
/// against the transport while the entity is idle.
const MESSAGE_RECEIVE_TIMEOUT_SECS: i64 = 60;

pub(crate) fn receive_timeout() -> Duration {
    Duration::seconds(MESSAGE_RECEIVE_TIMEOUT_SECS)
}

/// State shared between the pump handle and its worker tasks
pub(crate) struct PumpCore {
    pub(crate) factory: Arc<dyn ReceiverFactory>,
    pub(crate) entity_path: EntityPath,
    pub(crate) receive_mode: ReceiveMode,
    closing: AtomicBool,
    state: Mutex<PumpState>,
}

struct PumpState {
    handler_registered: bool,
    inner_receiver: Option<Arc<dyn MessageReceiver>>,
}

impl PumpCore {
    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// One-shot handler registration gate
    async fn set_handler_registered(&self) -> Result<(), PumpError> {
        if self.is_closing() {
            return Err(PumpError::UnsupportedOperation {
                message: "pump is closed".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        if state.handler_registered {
            return Err(PumpError::UnsupportedOperation {
                message: "a message or session handler is already registered".to_string(),
            });
        }
        state.handler_registered = true;
        Ok(())
    }
}

/// Concurrent dispatcher from a broker entity to user callbacks.
///
/// Created inert; [`register_message_handler`](Self::register_message_handler)
/// or [`register_session_handler`](Self::register_session_handler) starts the
/// worker loops. [`close`](Self::close) prevents new receives and session
/// accepts while in-flight work drains.
pub struct MessageAndSessionPump {
    core: Arc<PumpCore>,
}

impl MessageAndSessionPump {
    /// Create an inert pump for the entity
    pub fn new(
        factory: Arc<dyn ReceiverFactory>,
        entity_path: EntityPath,
        receive_mode: ReceiveMode,
    ) -> Self {
        Self {
            core: Arc::new(PumpCore {
                factory,
                entity_path,
                receive_mode,
                closing: AtomicBool::new(false),
                state: Mutex::new(PumpState {
                    handler_registered: false,
                    inner_receiver: None,
                }),
            }),
        }
    }

    /// Get the entity path this pump consumes
    pub fn entity_path(&self) -> &EntityPath {
        &self.core.entity_path
    }

    /// Get the receive mode
    pub fn receive_mode(&self) -> ReceiveMode {
        self.core.receive_mode
    }

    /// Register a message handler and start `max_concurrent_calls` worker
    /// loops against a receiver created from the factory.
    ///
    /// # Errors
    ///
    /// `UnsupportedOperation` if a handler is already registered or the pump
    /// is closed; validation errors for bad options; factory errors if the
    /// receiver cannot be created.
    pub async fn register_message_handler(
        &self,
        handler: Arc<dyn MessageHandler>,
        options: MessageHandlerOptions,
    ) -> Result<(), PumpError> {
        options.validate()?;
        self.core.set_handler_registered().await?;

        let receiver = self
            .core
            .factory
            .create_receiver(&self.core.entity_path, self.core.receive_mode)
            .await?;
        {
            let mut state = self.core.state.lock().await;
            state.inner_receiver = Some(Arc::clone(&receiver));
        }

        let context = MessagePumpContext {
            core: Arc::clone(&self.core),
            receiver,
            handler,
            options,
        };
        for worker in 0..context.options.max_concurrent_calls {
            let context = context.clone();
            tokio::spawn(async move {
                message_worker_loop(context, worker).await;
            });
        }

        info!(
            entity_path = %self.core.entity_path,
            receive_mode = %self.core.receive_mode,
            workers = context.options.max_concurrent_calls,
            "message handler registered"
        );
        Ok(())
    }

    /// Register a session handler and start `max_concurrent_sessions`
    /// acceptance loops.
    ///
    /// # Errors
    ///
    /// `UnsupportedOperation` if a handler is already registered or the pump
    /// is closed; validation errors for bad options.
    pub async fn register_session_handler(
        &self,
        handler: Arc<dyn SessionHandler>,
        options: SessionHandlerOptions,
    ) -> Result<(), PumpError> {
        options.validate()?;
        self.core.set_handler_registered().await?;

        let context = SessionPumpContext::new(Arc::clone(&self.core), handler, options);
        for _ in 0..context.options.max_concurrent_sessions {
            spawn_session_acceptance(context.clone());
        }

        info!(
            entity_path = %self.core.entity_path,
            receive_mode = %self.core.receive_mode,
            sessions = context.options.max_concurrent_sessions,
            workers_per_session = context.options.max_concurrent_calls_per_session,
            "session handler registered"
        );
        Ok(())
    }

    /// Close the pump: no new receives or session accepts are issued, and
    /// the inner receiver (non-sessioned mode) is closed. In-flight work
    /// drains naturally. Idempotent.
    pub async fn close(&self) -> Result<(), PumpError> {
        if self.core.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(entity_path = %self.core.entity_path, "pump closing");
        let receiver = {
            let state = self.core.state.lock().await;
            state.inner_receiver.clone()
        };
        match receiver {
            Some(receiver) => receiver.close().await,
            None => Ok(()),
        }
    }

    // ========================================================================
    // Disposition Facade
    // ========================================================================

    /// Complete the message holding `lock_token`
    pub async fn complete(&self, lock_token: &LockToken) -> Result<(), PumpError> {
        self.disposition_receiver().await?.complete(lock_token).await
    }

    /// Abandon the message holding `lock_token`
    pub async fn abandon(
        &self,
        lock_token: &LockToken,
        properties_to_modify: Option<PropertyMap>,
    ) -> Result<(), PumpError> {
        self.disposition_receiver()
            .await?
            .abandon(lock_token, properties_to_modify)
            .await
    }

    /// Defer the message holding `lock_token`
    pub async fn defer(
        &self,
        lock_token: &LockToken,
        properties_to_modify: Option<PropertyMap>,
    ) -> Result<(), PumpError> {
        self.disposition_receiver()
            .await?
            .defer(lock_token, properties_to_modify)
            .await
    }

    /// Dead-letter the message holding `lock_token`
    pub async fn dead_letter(
        &self,
        lock_token: &LockToken,
        reason: Option<String>,
        description: Option<String>,
        properties_to_modify: Option<PropertyMap>,
    ) -> Result<(), PumpError> {
        self.disposition_receiver()
            .await?
            .dead_letter(lock_token, reason, description, properties_to_modify)
            .await
    }

    /// The inner receiver, when disposition through the pump is legal.
    ///
    /// In sessioned mode no inner receiver exists: the session holds the
    /// lock, so disposition must be performed on the session receiver.
    async fn disposition_receiver(&self) -> Result<Arc<dyn MessageReceiver>, PumpError> {
        if self.core.is_closing() {
            return Err(PumpError::UnsupportedOperation {
                message: "pump is closed".to_string(),
            });
        }

        let state = self.core.state.lock().await;
        state
            .inner_receiver
            .clone()
            .ok_or_else(|| PumpError::UnsupportedOperation {
                message: "this operation is not supported on a message received from a session; \
                          use the session receiver to perform it"
                    .to_string(),
            })
    }
}

// ============================================================================
// Message Worker Loop
// ============================================================================

#[derive(Clone)]
struct MessagePumpContext {
    core: Arc<PumpCore>,
    receiver: Arc<dyn MessageReceiver>,
    handler: Arc<dyn MessageHandler>,
    options: MessageHandlerOptions,
}

impl MessagePumpContext {
    fn sink(&self) -> ExceptionSink {
        ExceptionSink::Message(Arc::clone(&self.handler))
    }
}

/// One receive/dispatch/dispose worker. Processes one message at a time and
/// does not issue the next receive until disposition of the previous message
/// has settled.
async fn message_worker_loop(context: MessagePumpContext, worker: usize) {
    debug!(worker, entity_path = %context.core.entity_path, "message worker started");

    while !context.core.is_closing() {
        let message = match context.receiver.receive(receive_timeout()).await {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(error) => {
                context.sink().notify(&error, ExceptionPhase::Receive);
                continue;
            }
        };

        dispatch_message(&context, message).await;
    }

    debug!(worker, entity_path = %context.core.entity_path, "message worker stopped");
}

/// Renew (peek-lock), invoke the callback, and dispose based on the outcome
async fn dispatch_message(context: &MessagePumpContext, message: ReceivedMessage) {
    let peek_lock = context.receiver.receive_mode().is_peek_lock();

    let renewal = if peek_lock {
        let stop_at = Timestamp::now().saturating_add(
            chrono::Duration::from_std(context.options.max_auto_renew_duration)
                .unwrap_or(chrono::Duration::MAX),
        );
        Some(RenewalLoop::start(
            Arc::new(MessageLockRenewer::new(
                Arc::clone(&context.receiver),
                message.clone(),
            )),
            context.sink(),
            message.locked_until(),
            Some(stop_at),
        ))
    } else {
        None
    };

    debug!(
        message_id = %message.message_id(),
        delivery_count = message.delivery_count(),
        "dispatching message"
    );
    let outcome = context.handler.on_message(message.clone()).await;
    if let Err(cause) = &outcome {
        let error = PumpError::UserCallbackFailure {
            message: cause.to_string(),
        };
        context.sink().notify(&error, ExceptionPhase::UserCallback);
    }

    if !peek_lock {
        return;
    }

    // Renewal must be fenced off before disposition; the cancelled flag
    // guarantees no renew call is issued after this point.
    if let Some(renewal) = renewal {
        renewal.cancel();
    }

    let disposition = match &outcome {
        Ok(()) if context.options.auto_complete => Some(ExceptionPhase::Complete),
        // Auto-complete disabled: the callback already disposed the message
        Ok(()) => None,
        Err(_) => Some(ExceptionPhase::Abandon),
    };

    if let Some(phase) = disposition {
        let result = match phase {
            ExceptionPhase::Complete => context.receiver.complete(message.lock_token()).await,
            _ => context.receiver.abandon(message.lock_token(), None).await,
        };
        if let Err(error) = result {
            // Disposition failures never stall the worker
            context.sink().notify(&error, phase);
        }
    }
}

#[cfg(test)]
#[path = "pump_tests.rs"]
mod tests;
