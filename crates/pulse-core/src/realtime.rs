//! Real-time delivery session
//!
//! Streams hits to the collector as they are generated, strictly in order
//! with one transfer in flight. The sessionStart hit is special: it is
//! enriched with the shared analytics identity, posted to the sessions
//! endpoint, and its Location response header yields the collector session id
//! every later hit is addressed with. A sessionStart that keeps failing is
//! retried up to the cap and then the whole session is dropped; any other hit
//! is dropped after a single failed attempt so the stream never stalls.

use crate::error::{Error, Result};
use crate::hit::{param_keys, MediaHit};
use crate::network::{session_events_url, sessions_url, HitRequest, Network};
use crate::session::{
    schedule_retry, spawn_transfer, MediaSession, SessionEventSender, TransferOutcome,
};
use crate::types::{
    EventType, ParamValue, Params, PrivacyStatus, SharedAnalyticsState, MAX_DELIVERY_RETRIES,
};
use regex::Regex;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{debug, error, info, warn};

/// Collector session create responds with `Location: /api/{ver}/sessions/{id}`
static COLLECTOR_PATH: OnceLock<Regex> = OnceLock::new();

fn parse_collector_session_id(location: &str) -> Option<String> {
    let re = COLLECTOR_PATH
        .get_or_init(|| Regex::new(r"^/api/(.*)/sessions/(.*)").expect("collector path pattern"));
    let captures = re.captures(location)?;
    let id = captures.get(2)?.as_str();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Identity params merged into the sessionStart hit at delivery time
pub(crate) fn analytics_params(state: &SharedAnalyticsState) -> Params {
    let mut params = Params::new();
    params.insert(
        param_keys::ANALYTICS_REPORT_SUITE.to_string(),
        ParamValue::from(state.report_suite.clone()),
    );
    params.insert(
        param_keys::ANALYTICS_ORG_ID.to_string(),
        ParamValue::from(state.org_id.clone()),
    );
    params.insert(
        param_keys::ANALYTICS_VISITOR_ID.to_string(),
        ParamValue::from(state.visitor_id.clone()),
    );
    params.insert(
        param_keys::MEDIA_PLAYER_NAME.to_string(),
        ParamValue::from(state.player_name.clone()),
    );
    if !state.channel.is_empty() {
        params.insert(
            param_keys::MEDIA_CHANNEL.to_string(),
            ParamValue::from(state.channel.clone()),
        );
    }
    if !state.app_version.is_empty() {
        params.insert(
            param_keys::MEDIA_APP_VERSION.to_string(),
            ParamValue::from(state.app_version.clone()),
        );
    }
    params
}

pub struct MediaRealTimeSession {
    id: String,
    analytics: Arc<RwLock<SharedAnalyticsState>>,
    network: Arc<dyn Network>,
    events: SessionEventSender,
    queue: VecDeque<MediaHit>,
    collector_session_id: Option<String>,
    in_flight: bool,
    start_retries: u32,
    ending: bool,
    terminated: bool,
}

impl MediaRealTimeSession {
    pub fn new(
        id: String,
        analytics: Arc<RwLock<SharedAnalyticsState>>,
        network: Arc<dyn Network>,
        events: SessionEventSender,
    ) -> Self {
        Self {
            id,
            analytics,
            network,
            events,
            queue: VecDeque::new(),
            collector_session_id: None,
            in_flight: false,
            start_retries: 0,
            ending: false,
            terminated: false,
        }
    }

    fn analytics_snapshot(&self) -> SharedAnalyticsState {
        self.analytics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Starts a transfer for the queue head if nothing is in flight. The head
    /// stays queued until its outcome arrives.
    fn process_queue(&mut self) {
        if self.in_flight || self.terminated {
            return;
        }
        loop {
            let Some(hit) = self.queue.front() else {
                if self.ending {
                    debug!(session_id = %self.id, "Queue drained, real-time session done");
                    self.terminated = true;
                }
                return;
            };

            let state = self.analytics_snapshot();
            if state.privacy != PrivacyStatus::OptedIn {
                debug!(session_id = %self.id, "Privacy not opted in, delivery idle");
                return;
            }
            let request = if hit.event_type() == EventType::SessionStart {
                if !state.is_ready() {
                    debug!(session_id = %self.id, "Waiting for analytics identity before sessionStart");
                    return;
                }
                let enriched = hit.with_added_params(analytics_params(&state));
                self.build_request(sessions_url(&state.collection_host), &enriched)
            } else {
                let Some(collector_id) = &self.collector_session_id else {
                    warn!(session_id = %self.id, event = hit.event_type().as_str(),
                          "No collector session, dropping hit");
                    self.queue.pop_front();
                    continue;
                };
                self.build_request(session_events_url(&state.collection_host, collector_id), hit)
            };

            match request {
                Ok(request) => {
                    self.in_flight = true;
                    spawn_transfer(
                        self.network.clone(),
                        request,
                        self.id.clone(),
                        self.events.clone(),
                    );
                }
                Err(error) => {
                    error!(session_id = %self.id, event = hit.event_type().as_str(), %error,
                           "Undeliverable hit, dropping");
                    self.queue.pop_front();
                    continue;
                }
            }
            return;
        }
    }

    fn build_request(&self, url: Result<String>, hit: &MediaHit) -> Result<HitRequest> {
        Ok(HitRequest {
            url: url?,
            body: serde_json::to_value(hit.to_wire())?,
        })
    }

    /// The sessionStart attempt failed in a retryable way; back off, or give
    /// up on the whole session once the cap is hit.
    fn fail_start_attempt(&mut self, reason: &Error) {
        self.start_retries += 1;
        if self.start_retries > MAX_DELIVERY_RETRIES {
            error!(session_id = %self.id, %reason,
                   "Session create failed after retries, dropping session");
            self.queue.clear();
            self.terminated = true;
        } else {
            warn!(session_id = %self.id, %reason, attempt = self.start_retries,
                  "Session create failed, will retry");
            schedule_retry(self.id.clone(), self.events.clone());
        }
    }
}

impl MediaSession for MediaRealTimeSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn queue(&mut self, hit: MediaHit) {
        if self.terminated {
            debug!(session_id = %self.id, event = hit.event_type().as_str(),
                   "Session already over, ignoring hit");
            return;
        }
        self.queue.push_back(hit);
        self.process_queue();
    }

    fn end(&mut self) {
        self.ending = true;
        if !self.in_flight && self.queue.is_empty() {
            self.terminated = true;
        }
    }

    fn abort(&mut self) {
        info!(session_id = %self.id, dropped = self.queue.len(), "Aborting real-time session");
        self.queue.clear();
        self.terminated = true;
    }

    fn notify_update(&mut self) {
        self.process_queue();
    }

    fn handle_outcome(&mut self, outcome: TransferOutcome) {
        self.in_flight = false;
        if self.terminated {
            return;
        }
        let Some(head) = self.queue.front() else {
            return;
        };
        let is_start = head.event_type() == EventType::SessionStart;

        match outcome {
            TransferOutcome::Response(response) if response.is_success() => {
                if is_start {
                    match response.location.as_deref().and_then(parse_collector_session_id) {
                        Some(collector_id) => {
                            info!(session_id = %self.id, collector_id = %collector_id,
                                  "Collector session established");
                            self.collector_session_id = Some(collector_id);
                            self.start_retries = 0;
                            self.queue.pop_front();
                            self.process_queue();
                        }
                        None => {
                            // No usable Location header; treated like a
                            // retryable delivery failure.
                            self.fail_start_attempt(&Error::CollectorResponse(
                                "missing or malformed Location header".to_string(),
                            ));
                        }
                    }
                } else {
                    self.queue.pop_front();
                    self.process_queue();
                }
            }
            outcome if outcome.is_recoverable() => {
                if is_start {
                    self.fail_start_attempt(&outcome.into_error());
                } else {
                    warn!(session_id = %self.id, event = head.event_type().as_str(),
                          error = %outcome.into_error(), "Delivery failed, dropping hit");
                    self.queue.pop_front();
                    self.process_queue();
                }
            }
            other => {
                let error = other.into_error();
                if is_start {
                    error!(session_id = %self.id, %error,
                           "Fatal collector response, dropping session");
                    self.queue.clear();
                    self.terminated = true;
                } else {
                    warn!(session_id = %self.id, event = head.event_type().as_str(), %error,
                          "Fatal delivery failure, dropping hit");
                    self.queue.pop_front();
                    self.process_queue();
                }
            }
        }
    }

    fn handle_retry(&mut self) {
        if self.terminated {
            return;
        }
        self.process_queue();
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}
