//! Session acceptance and per-session message pumping.
//!
//! An acceptance loop takes any available session from the entity, starts a
//! session renewal loop, and hands the session to a pool of inner workers.
//! The [`SessionTracker`] decides when the session has drained: only when
//! every inner worker observes "no message or exception" without an
//! intervening successful receive is the session closed and a fresh
//! acceptance armed. A momentarily idle session is kept as long as any
//! worker still sees traffic.

use crate::error::PumpError;
use crate::handler::{ExceptionPhase, ExceptionSink, SessionHandler, SessionHandlerOptions};
use crate::message::ReceivedMessage;
use crate::pump::{receive_timeout, PumpCore};
use crate::receiver::SessionReceiver;
use crate::renewal::{RenewalLoop, SessionLockRenewer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Backoff between session-accept attempts after a failure or an empty
/// (timed-out) accept
const ACCEPT_SESSION_BACKOFF: Duration = Duration::from_secs(60);

/// Everything the session loops need; cheap to clone into spawned tasks
#[derive(Clone)]
pub(crate) struct SessionPumpContext {
    pub(crate) core: Arc<PumpCore>,
    pub(crate) handler: Arc<dyn SessionHandler>,
    pub(crate) options: SessionHandlerOptions,
}

impl SessionPumpContext {
    pub(crate) fn new(
        core: Arc<PumpCore>,
        handler: Arc<dyn SessionHandler>,
        options: SessionHandlerOptions,
    ) -> Self {
        Self {
            core,
            handler,
            options,
        }
    }

    fn sink(&self) -> ExceptionSink {
        ExceptionSink::Session(Arc::clone(&self.handler))
    }
}

/// Spawn one acceptance task. Called once per configured concurrent session
/// at registration, and again by the tracker each time a session is released.
pub(crate) fn spawn_session_acceptance(context: SessionPumpContext) {
    tokio::spawn(async move {
        accept_sessions_and_pump(context).await;
    });
}

/// Accept one session and hand it to the inner worker pool.
///
/// A timeout means no session is available right now; back off and retry.
/// Operation-cancelled means the entity is gone: terminal for this task, and
/// expected during teardown, so it is not reported. Any other failure is
/// reported and retried after the backoff.
async fn accept_sessions_and_pump(context: SessionPumpContext) {
    loop {
        if context.core.is_closing() {
            return;
        }

        let session = match context
            .core
            .factory
            .accept_session(&context.core.entity_path, None, context.core.receive_mode)
            .await
        {
            Ok(session) => session,
            Err(error) => {
                if error.is_terminal_for_acceptance() {
                    debug!(
                        entity_path = %context.core.entity_path,
                        "session acceptance cancelled by the service, stopping"
                    );
                    return;
                }
                if !matches!(error, PumpError::Timeout { .. }) {
                    context.sink().notify(&error, ExceptionPhase::AcceptSession);
                }
                tokio::time::sleep(ACCEPT_SESSION_BACKOFF).await;
                continue;
            }
        };

        info!(
            entity_path = %context.core.entity_path,
            session_id = %session.session_id(),
            "session accepted"
        );

        let renewal = RenewalLoop::start(
            Arc::new(SessionLockRenewer::new(Arc::clone(&session))),
            context.sink(),
            session.locked_until(),
            None,
        );
        let tracker = Arc::new(SessionTracker::new(context, session, renewal));
        for worker in 0..tracker.context.options.max_concurrent_calls_per_session {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                session_worker_loop(tracker, worker).await;
            });
        }

        // The tracker re-arms acceptance once this session is released.
        return;
    }
}

/// One inner worker: receive from the session, dispatch, dispose, and consult
/// the tracker whenever the session looks idle
async fn session_worker_loop(tracker: Arc<SessionTracker>, worker: usize) {
    let session_id = tracker.session.session_id().clone();
    debug!(worker, session_id = %session_id, "session worker started");

    loop {
        if tracker.context.core.is_closing() {
            break;
        }

        match tracker.session.receive(receive_timeout()).await {
            Ok(Some(message)) => {
                tracker.notify_message_received().await;
                dispatch_session_message(&tracker, message).await;
            }
            Ok(None) => {
                if !tracker.should_retry_on_idle().await {
                    break;
                }
            }
            Err(error) => {
                tracker.context.sink().notify(&error, ExceptionPhase::Receive);
                if !tracker.should_retry_on_idle().await {
                    break;
                }
            }
        }
    }

    debug!(worker, session_id = %session_id, "session worker stopped");
}

/// Invoke the callback and dispose on the session based on the outcome.
///
/// Session messages stay locked as long as the session lock holds, so there
/// is no per-message renewal; instead a guard timer cancels the session
/// renewal loop if the callback overruns its budget.
async fn dispatch_session_message(tracker: &Arc<SessionTracker>, message: ReceivedMessage) {
    let context = &tracker.context;
    let session = &tracker.session;

    let renewal_cancel_guard = spawn_renewal_cancel_guard(
        Arc::clone(&tracker.renewal),
        context.options.max_auto_renew_duration,
    );

    debug!(
        session_id = %session.session_id(),
        message_id = %message.message_id(),
        "dispatching session message"
    );
    let outcome = context
        .handler
        .on_message(Arc::clone(session), message.clone())
        .await;
    renewal_cancel_guard.abort();

    if let Err(cause) = &outcome {
        let error = PumpError::UserCallbackFailure {
            message: cause.to_string(),
        };
        context.sink().notify(&error, ExceptionPhase::UserCallback);
    }

    if !context.core.receive_mode.is_peek_lock() {
        return;
    }

    let disposition = match &outcome {
        Ok(()) if context.options.auto_complete => Some(ExceptionPhase::Complete),
        Ok(()) => None,
        Err(_) => Some(ExceptionPhase::Abandon),
    };

    if let Some(phase) = disposition {
        let result = match phase {
            ExceptionPhase::Complete => session.complete(message.lock_token()).await,
            _ => session.abandon(message.lock_token(), None).await,
        };
        if let Err(error) = result {
            context.sink().notify(&error, phase);
        }
    }
}

/// Cancel `renewal` after `delay` unless aborted first
fn spawn_renewal_cancel_guard(renewal: Arc<RenewalLoop>, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        renewal.cancel();
    })
}

// ============================================================================
// Session Tracker
// ============================================================================

/// Per-session drain coordination.
///
/// Workers that observe an empty receive or a receive error park on a shared
/// verdict. A successful receive by any sibling resolves the verdict `true`
/// and un-parks everyone; the last worker to park resolves it `false` and
/// begins session release. Each parking round gets a fresh single-shot
/// verdict so stale resolutions cannot leak between rounds.
pub(crate) struct SessionTracker {
    context: SessionPumpContext,
    session: Arc<dyn SessionReceiver>,
    renewal: Arc<RenewalLoop>,
    worker_count: usize,
    state: Mutex<TrackerState>,
}

struct TrackerState {
    parked_workers: usize,
    verdict: Option<watch::Sender<Option<bool>>>,
}

impl SessionTracker {
    fn new(
        context: SessionPumpContext,
        session: Arc<dyn SessionReceiver>,
        renewal: Arc<RenewalLoop>,
    ) -> Self {
        let worker_count = context.options.max_concurrent_calls_per_session;
        Self {
            context,
            session,
            renewal,
            worker_count,
            state: Mutex::new(TrackerState {
                parked_workers: 0,
                verdict: None,
            }),
        }
    }

    /// Park until a sibling receives a message (`true`) or the whole pool is
    /// idle and the session is being released (`false`)
    async fn should_retry_on_idle(self: &Arc<Self>) -> bool {
        let mut receiver = {
            let mut state = self.state.lock().await;

            // A resolved verdict belongs to a finished parking round; this
            // observation starts a new one.
            let resolved = match &state.verdict {
                Some(sender) => sender.borrow().is_some(),
                None => true,
            };
            if resolved {
                let (sender, _) = watch::channel(None);
                state.verdict = Some(sender);
            }

            state.parked_workers += 1;
            let sender = match &state.verdict {
                Some(sender) => sender,
                None => return false,
            };
            let receiver = sender.subscribe();

            if state.parked_workers == self.worker_count {
                sender.send_replace(Some(false));
                self.begin_session_release();
            }

            receiver
        };

        let result = match receiver.wait_for(|verdict| verdict.is_some()).await {
            Ok(verdict) => (*verdict).unwrap_or(false),
            Err(_) => false,
        };
        result
    }

    /// A worker received a message: un-park all waiting siblings
    async fn notify_message_received(&self) {
        let mut state = self.state.lock().await;
        let parking_round_open = state
            .verdict
            .as_ref()
            .map(|sender| sender.borrow().is_none())
            .unwrap_or(false);
        if parking_round_open {
            state.parked_workers = 0;
            if let Some(sender) = &state.verdict {
                sender.send_replace(Some(true));
            }
        }
    }

    fn begin_session_release(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker.release_session().await;
        });
    }

    /// Close handshake: stop renewal (under a guard so a hung close callback
    /// cannot pin the session lock forever), run the user's close callback,
    /// close the session, and re-arm acceptance
    async fn release_session(&self) {
        let context = &self.context;
        let session_id = self.session.session_id().clone();
        info!(session_id = %session_id, "session drained, releasing");

        let renewal_cancel_guard = spawn_renewal_cancel_guard(
            Arc::clone(&self.renewal),
            context.options.max_auto_renew_duration,
        );
        let close_outcome = context
            .handler
            .on_close_session(Arc::clone(&self.session))
            .await;
        renewal_cancel_guard.abort();

        if let Err(cause) = close_outcome {
            let error = PumpError::UserCallbackFailure {
                message: cause.to_string(),
            };
            context.sink().notify(&error, ExceptionPhase::UserCallback);
        }

        // Safe even if the guard fired first; cancel is idempotent.
        self.renewal.cancel();

        if let Err(error) = self.session.close().await {
            context.sink().notify(&error, ExceptionPhase::SessionClose);
        }

        debug!(session_id = %session_id, "session released, re-arming acceptance");
        spawn_session_acceptance(context.clone());
    }
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
