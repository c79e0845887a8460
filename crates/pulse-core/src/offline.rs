//! Offline (downloaded content) delivery session
//!
//! Hits generated while playing downloaded media are persisted locally
//! instead of streamed. When the session ends, the whole run is assembled
//! into one report and posted as a JSON array to the sessions endpoint.
//! Device-offline failures are expected in this mode and never count against
//! the retry cap; every other failure does.

use crate::error::Error;
use crate::hit::MediaHit;
use crate::network::{sessions_url, HitRequest, Network};
use crate::session::{
    schedule_retry, spawn_transfer, MediaSession, SessionEventSender, TransferOutcome,
};
use crate::store::HitStore;
use crate::types::{EventType, PrivacyStatus, SharedAnalyticsState, MAX_DELIVERY_RETRIES};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Normalizes a persisted run into a reportable batch: everything before the
/// first sessionStart is dropped, everything after the first terminal hit is
/// dropped, and a missing terminal hit is synthesized as a sessionEnd at the
/// last hit's position. Returns None when there is nothing to report.
pub fn assemble_session_report(hits: Vec<MediaHit>) -> Option<Vec<MediaHit>> {
    let start = hits
        .iter()
        .position(|h| h.event_type() == EventType::SessionStart)?;
    let mut report: Vec<MediaHit> = Vec::with_capacity(hits.len() - start);
    for hit in hits.into_iter().skip(start) {
        let terminal = hit.event_type().is_terminal();
        report.push(hit);
        if terminal {
            return Some(report);
        }
    }
    // Ran out without a terminal hit; close the session where it stopped
    let last = report.last().cloned()?;
    report.push(MediaHit::new(
        EventType::SessionEnd,
        last.playhead(),
        last.ts(),
        None,
        None,
        None,
    ));
    Some(report)
}

pub struct MediaOfflineSession {
    id: String,
    analytics: Arc<RwLock<SharedAnalyticsState>>,
    network: Arc<dyn Network>,
    events: SessionEventSender,
    store: Arc<dyn HitStore>,
    in_flight: bool,
    reporting: bool,
    failures: u32,
    terminated: bool,
}

impl MediaOfflineSession {
    pub fn new(
        id: String,
        analytics: Arc<RwLock<SharedAnalyticsState>>,
        network: Arc<dyn Network>,
        store: Arc<dyn HitStore>,
        events: SessionEventSender,
    ) -> Self {
        Self {
            id,
            analytics,
            network,
            events,
            store,
            in_flight: false,
            reporting: false,
            failures: 0,
            terminated: false,
        }
    }

    fn analytics_snapshot(&self) -> SharedAnalyticsState {
        self.analytics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Discards everything persisted for this run and terminates.
    fn discard(&mut self) {
        if let Err(error) = self.store.delete_hits(&self.id) {
            warn!(session_id = %self.id, %error, "Failed to clear persisted hits");
        }
        self.terminated = true;
    }

    fn try_report(&mut self) {
        if self.in_flight || self.terminated || !self.reporting {
            return;
        }
        let state = self.analytics_snapshot();
        if state.privacy != PrivacyStatus::OptedIn {
            debug!(session_id = %self.id, "Privacy not opted in, batch report idle");
            return;
        }
        if !state.is_ready() {
            debug!(session_id = %self.id, "Waiting for analytics identity before batch report");
            return;
        }

        let hits = match self.store.get_hits(&self.id) {
            Ok(hits) => hits,
            Err(error) => {
                error!(session_id = %self.id, %error, "Cannot read persisted hits, dropping session");
                self.discard();
                return;
            }
        };
        let Some(report) = assemble_session_report(hits) else {
            debug!(session_id = %self.id, "No reportable run persisted");
            self.discard();
            return;
        };

        let wire: Vec<serde_json::Value> = match report
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                // Identity rides on the batch's sessionStart, like the
                // real-time handshake
                if i == 0 {
                    serde_json::to_value(
                        hit.with_added_params(crate::realtime::analytics_params(&state))
                            .to_wire(),
                    )
                } else {
                    serde_json::to_value(hit.to_wire())
                }
            })
            .collect::<std::result::Result<_, _>>()
            .map_err(Error::Payload)
        {
            Ok(wire) => wire,
            Err(error) => {
                error!(session_id = %self.id, %error, "Unserializable batch, dropping session");
                self.discard();
                return;
            }
        };

        let url = match sessions_url(&state.collection_host) {
            Ok(url) => url,
            Err(error) => {
                warn!(session_id = %self.id, %error, "Bad collection host, batch report idle");
                return;
            }
        };

        info!(session_id = %self.id, hits = wire.len(), "Reporting offline session batch");
        self.in_flight = true;
        spawn_transfer(
            self.network.clone(),
            HitRequest {
                url,
                body: serde_json::Value::Array(wire),
            },
            self.id.clone(),
            self.events.clone(),
        );
    }
}

impl MediaSession for MediaOfflineSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn queue(&mut self, hit: MediaHit) {
        if self.terminated {
            debug!(session_id = %self.id, event = hit.event_type().as_str(),
                   "Session already over, ignoring hit");
            return;
        }
        if let Err(error) = self.store.persist_hit(&self.id, hit) {
            warn!(session_id = %self.id, %error, "Failed to persist hit");
        }
    }

    fn end(&mut self) {
        self.reporting = true;
        self.try_report();
    }

    fn abort(&mut self) {
        info!(session_id = %self.id, "Aborting offline session");
        self.discard();
    }

    fn notify_update(&mut self) {
        self.try_report();
    }

    fn handle_outcome(&mut self, outcome: TransferOutcome) {
        self.in_flight = false;
        if self.terminated {
            return;
        }
        match outcome {
            TransferOutcome::Response(response) if response.is_success() => {
                info!(session_id = %self.id, "Offline batch delivered");
                self.discard();
            }
            TransferOutcome::Failed(Error::DeviceOffline) => {
                // Being offline is this mode's normal condition, so it never
                // burns a retry
                debug!(session_id = %self.id, "Device offline, batch delivery deferred");
                schedule_retry(self.id.clone(), self.events.clone());
            }
            outcome if outcome.is_recoverable() => {
                self.failures += 1;
                let error = outcome.into_error();
                if self.failures > MAX_DELIVERY_RETRIES {
                    error!(session_id = %self.id, %error, "Batch rejected after retries, dropping");
                    self.discard();
                } else {
                    warn!(session_id = %self.id, attempt = self.failures, %error,
                          "Batch delivery failed, will retry");
                    schedule_retry(self.id.clone(), self.events.clone());
                }
            }
            other => {
                error!(session_id = %self.id, error = %other.into_error(),
                       "Fatal collector response, dropping batch");
                self.discard();
            }
        }
    }

    fn handle_retry(&mut self) {
        self.try_report();
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}
