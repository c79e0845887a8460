//! Delivery session abstraction
//!
//! A [`MediaSession`] owns the ordered queue of hits for one tracking run and
//! drives them to the collector. Sessions are plain state machines mutated
//! only from the service loop; network transfers and retry timers run on
//! spawned tasks and report back through the [`SessionEvent`] channel, so a
//! session never needs its own lock.

use crate::error::Error;
use crate::hit::MediaHit;
use crate::network::{is_recoverable_status, HitRequest, HitResponse, Network};
use crate::types::RETRY_BACKOFF_MS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// How one transfer attempt ended
#[derive(Debug)]
pub enum TransferOutcome {
    Response(HitResponse),
    Failed(Error),
}

impl TransferOutcome {
    /// A failed attempt worth retrying: transport-level trouble or one of
    /// the retryable collector statuses.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransferOutcome::Response(response) => {
                !response.is_success() && is_recoverable_status(response.status)
            }
            TransferOutcome::Failed(error) => error.is_recoverable(),
        }
    }

    /// Folds a failed attempt into the error taxonomy for logging.
    pub fn into_error(self) -> Error {
        match self {
            TransferOutcome::Response(response) => Error::CollectorStatus {
                status: response.status,
            },
            TransferOutcome::Failed(error) => error,
        }
    }
}

/// Events flowing back into the service loop from spawned tasks
#[derive(Debug)]
pub enum SessionEvent {
    TransferComplete {
        session_id: String,
        outcome: TransferOutcome,
    },
    RetryElapsed {
        session_id: String,
    },
}

pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;

pub trait MediaSession: Send {
    /// Local session id, distinct from the collector-assigned id.
    fn id(&self) -> &str;

    /// Appends a hit to the ordered queue and kicks delivery if idle.
    fn queue(&mut self, hit: MediaHit);

    /// Graceful end: deliver what is queued, then terminate.
    fn end(&mut self);

    /// Immediate teardown, discarding queued and in-flight work.
    fn abort(&mut self);

    /// Shared analytics state changed; a session blocked on missing
    /// identity parameters may now be able to proceed.
    fn notify_update(&mut self);

    /// A transfer spawned by this session finished.
    fn handle_outcome(&mut self, outcome: TransferOutcome);

    /// A retry backoff scheduled by this session elapsed.
    fn handle_retry(&mut self);

    fn is_terminated(&self) -> bool;
}

/// Runs one POST on a spawned task and reports the outcome back to the
/// service loop. The session keeps at most one of these in flight.
pub(crate) fn spawn_transfer(
    network: Arc<dyn Network>,
    request: HitRequest,
    session_id: String,
    events: SessionEventSender,
) {
    tokio::spawn(async move {
        let outcome = match network.post(request).await {
            Ok(response) => TransferOutcome::Response(response),
            Err(error) => TransferOutcome::Failed(error),
        };
        // Send fails only if the service loop is gone, nothing to do then
        let _ = events.send(SessionEvent::TransferComplete {
            session_id,
            outcome,
        });
    });
}

/// Arms the fixed retry backoff for a session.
pub(crate) fn schedule_retry(session_id: String, events: SessionEventSender) {
    debug!(session_id = %session_id, backoff_ms = RETRY_BACKOFF_MS, "Scheduling delivery retry");
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
        let _ = events.send(SessionEvent::RetryElapsed { session_id });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_recoverability() {
        let retryable = TransferOutcome::Response(HitResponse {
            status: 503,
            location: None,
        });
        assert!(retryable.is_recoverable());

        let fatal = TransferOutcome::Response(HitResponse {
            status: 400,
            location: None,
        });
        assert!(!fatal.is_recoverable());

        let success = TransferOutcome::Response(HitResponse {
            status: 200,
            location: None,
        });
        assert!(!success.is_recoverable());

        assert!(TransferOutcome::Failed(Error::DeviceOffline).is_recoverable());
        assert!(TransferOutcome::Failed(Error::RequestTimeout).is_recoverable());
        assert!(!TransferOutcome::Failed(Error::InvalidConfig("x".into())).is_recoverable());
    }

    #[test]
    fn test_outcome_error_folding() {
        let rejected = TransferOutcome::Response(HitResponse {
            status: 400,
            location: None,
        });
        match rejected.into_error() {
            Error::CollectorStatus { status } => assert_eq!(status, 400),
            other => panic!("unexpected error: {other}"),
        }

        match TransferOutcome::Failed(Error::DeviceOffline).into_error() {
            Error::DeviceOffline => {}
            other => panic!("unexpected error: {other}"),
        }
    }
}
