//! Lock renewal loops.
//!
//! A renewal loop keeps a broker-side lock alive while a user callback runs.
//! Each iteration computes a delay from the lock's expiry, sleeps, renews,
//! and re-iterates with the returned expiry. Cancellation is a flag checked
//! at the top of every iteration, so a cancel issued while the renew timer is
//! in flight still prevents any further renew call.

use crate::error::PumpError;
use crate::handler::{ExceptionPhase, ExceptionSink};
use crate::message::{ReceivedMessage, Timestamp};
use crate::receiver::{MessageReceiver, SessionReceiver};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Assumed validity of a lock whose expiry is already in the past. Clock skew
/// between broker and consumer makes this common; renewal keeps trying on a
/// short cadence instead of giving up.
const MINIMUM_LOCK_VALIDITY_SECS: i64 = 4;

/// Upper bound on how far before expiry the renew call is issued
const MAXIMUM_RENEW_BUFFER_SECS: i64 = 10;

/// Compute the sleep before the next renew call.
///
/// The buffer leaves the renew call time to arrive before expiry while
/// keeping long locks on a reasonable renewal cadence.
pub(crate) fn next_renew_interval(locked_until: &Timestamp) -> Duration {
    let mut remaining = locked_until.as_datetime() - Utc::now();
    if remaining < Duration::zero() {
        remaining = Duration::seconds(MINIMUM_LOCK_VALIDITY_SECS);
    }

    let buffer = std::cmp::min(remaining / 2, Duration::seconds(MAXIMUM_RENEW_BUFFER_SECS));
    remaining - buffer
}

/// The renewable lock a [`RenewalLoop`] drives
#[async_trait]
pub(crate) trait LockRenewer: Send + Sync + 'static {
    /// Phase tag for faults reported from this renewer
    fn phase(&self) -> ExceptionPhase;

    /// Renew the lock, returning the new locked-until instant
    async fn renew(&self) -> Result<Timestamp, PumpError>;
}

/// Renews the lock of a single in-flight message
pub(crate) struct MessageLockRenewer {
    receiver: Arc<dyn MessageReceiver>,
    message: ReceivedMessage,
}

impl MessageLockRenewer {
    pub(crate) fn new(receiver: Arc<dyn MessageReceiver>, message: ReceivedMessage) -> Self {
        Self { receiver, message }
    }
}

#[async_trait]
impl LockRenewer for MessageLockRenewer {
    fn phase(&self) -> ExceptionPhase {
        ExceptionPhase::RenewMessageLock
    }

    async fn renew(&self) -> Result<Timestamp, PumpError> {
        self.receiver.renew_message_lock(&self.message).await
    }
}

/// Renews the lock of an accepted session
pub(crate) struct SessionLockRenewer {
    session: Arc<dyn SessionReceiver>,
}

impl SessionLockRenewer {
    pub(crate) fn new(session: Arc<dyn SessionReceiver>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl LockRenewer for SessionLockRenewer {
    fn phase(&self) -> ExceptionPhase {
        ExceptionPhase::RenewSessionLock
    }

    async fn renew(&self) -> Result<Timestamp, PumpError> {
        self.session.renew_session_lock().await
    }
}

/// Periodic lock renewal with adaptive interval and idempotent cancellation.
///
/// Message renewal stops once the lock expiry reaches `stop_at` (the user's
/// renewal budget); session renewal runs until cancelled.
pub(crate) struct RenewalLoop {
    cancelled: AtomicBool,
    cancel_signal: Notify,
}

impl RenewalLoop {
    /// Spawn the loop and return a cancellation handle
    pub(crate) fn start(
        renewer: Arc<dyn LockRenewer>,
        sink: ExceptionSink,
        locked_until: Timestamp,
        stop_at: Option<Timestamp>,
    ) -> Arc<Self> {
        let renewal = Arc::new(Self {
            cancelled: AtomicBool::new(false),
            cancel_signal: Notify::new(),
        });

        let handle = Arc::clone(&renewal);
        tokio::spawn(async move {
            handle.run(renewer, sink, locked_until, stop_at).await;
        });

        renewal
    }

    /// Cancel the loop.
    ///
    /// Idempotent and callable from any task; interrupts an in-flight sleep.
    pub(crate) fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.cancel_signal.notify_one();
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn run(
        &self,
        renewer: Arc<dyn LockRenewer>,
        sink: ExceptionSink,
        mut locked_until: Timestamp,
        stop_at: Option<Timestamp>,
    ) {
        loop {
            if self.is_cancelled() {
                break;
            }

            // Renewal budget exhausted; the broker reclaims the lock if the
            // callback has not finished by the time it expires.
            if let Some(stop_at) = &stop_at {
                if locked_until >= *stop_at {
                    debug!(phase = %renewer.phase(), "renewal budget exhausted, stopping loop");
                    break;
                }
            }

            let delay = next_renew_interval(&locked_until)
                .to_std()
                .unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel_signal.notified() => break,
            }

            if self.is_cancelled() {
                break;
            }

            match renewer.renew().await {
                Ok(new_locked_until) => {
                    debug!(
                        phase = %renewer.phase(),
                        locked_until = %new_locked_until,
                        "lock renewed"
                    );
                    locked_until = new_locked_until;
                }
                Err(error) => {
                    sink.notify(&error, renewer.phase());
                    if error.is_terminal_for_renewal() {
                        break;
                    }
                    // The stale expiry feeds the next interval computation;
                    // an expired lock yields the minimum-validity cadence
                    // rather than a tight retry loop.
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "renewal_tests.rs"]
mod tests;
