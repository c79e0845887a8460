//! MediaService - session registry and serial delivery executor
//!
//! The service is the bridge between synchronous tracking and async
//! delivery. Trackers call the [`MediaProcessor`] facade, which mints a local
//! session id and forwards work over an unbounded channel; a single spawned
//! loop owns every session and mutates them one event at a time, so delivery
//! state needs no locking. Network transfers and retry timers report back to
//! the same loop through the session-event channel.

use crate::generator::{MediaProcessor, SessionConfig};
use crate::hit::MediaHit;
use crate::network::Network;
use crate::offline::MediaOfflineSession;
use crate::realtime::MediaRealTimeSession;
use crate::session::{MediaSession, SessionEvent, SessionEventSender};
use crate::store::HitStore;
use crate::tracker::MediaEventTracker;
use crate::types::{PrivacyStatus, SharedAnalyticsState, TrackerConfig};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

enum TrackerCommand {
    CreateSession {
        session_id: String,
        config: SessionConfig,
    },
    ProcessHit {
        session_id: String,
        hit: MediaHit,
    },
    EndSession {
        session_id: String,
    },
    AnalyticsUpdated,
}

pub struct MediaService {
    analytics: Arc<RwLock<SharedAnalyticsState>>,
    commands: mpsc::UnboundedSender<TrackerCommand>,
}

impl MediaService {
    /// Spawns the delivery loop. Persisted offline runs from earlier process
    /// lifetimes are picked up and reported first.
    pub fn new(network: Arc<dyn Network>, store: Arc<dyn HitStore>) -> Arc<Self> {
        let analytics = Arc::new(RwLock::new(SharedAnalyticsState::default()));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut service_loop = ServiceLoop {
            sessions: HashMap::new(),
            analytics: analytics.clone(),
            network,
            store,
            events: events_tx,
        };
        tokio::spawn(async move {
            service_loop.rehydrate_persisted_sessions();
            service_loop.run(commands_rx, events_rx).await;
        });

        Arc::new(Self {
            analytics,
            commands: commands_tx,
        })
    }

    /// Creates a tracker wired to this service's delivery pipeline.
    pub fn tracker(self: &Arc<Self>, config: TrackerConfig) -> MediaEventTracker {
        MediaEventTracker::new(self.clone(), config)
    }

    /// Replaces the shared analytics identity and fans the change out to
    /// every live session. Opting out aborts all tracking immediately.
    pub fn update_analytics_state(&self, state: SharedAnalyticsState) {
        *self
            .analytics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
        let _ = self.commands.send(TrackerCommand::AnalyticsUpdated);
    }

    pub fn privacy_status(&self) -> PrivacyStatus {
        self.analytics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .privacy
    }
}

impl MediaProcessor for MediaService {
    fn create_session(&self, config: SessionConfig) -> Option<String> {
        if self.privacy_status() == PrivacyStatus::OptedOut {
            info!("Privacy opted out, refusing tracking session");
            return None;
        }
        let session_id = Uuid::new_v4().to_string();
        if self
            .commands
            .send(TrackerCommand::CreateSession {
                session_id: session_id.clone(),
                config,
            })
            .is_err()
        {
            warn!("Delivery loop gone, refusing tracking session");
            return None;
        }
        Some(session_id)
    }

    fn process_hit(&self, session_id: &str, hit: MediaHit) {
        let _ = self.commands.send(TrackerCommand::ProcessHit {
            session_id: session_id.to_string(),
            hit,
        });
    }

    fn end_session(&self, session_id: &str) {
        let _ = self.commands.send(TrackerCommand::EndSession {
            session_id: session_id.to_string(),
        });
    }
}

/// Single-owner state of the delivery loop; every mutation happens on the
/// loop task.
struct ServiceLoop {
    sessions: HashMap<String, Box<dyn MediaSession>>,
    analytics: Arc<RwLock<SharedAnalyticsState>>,
    network: Arc<dyn Network>,
    store: Arc<dyn HitStore>,
    events: SessionEventSender,
}

impl ServiceLoop {
    async fn run(
        &mut self,
        mut commands: mpsc::UnboundedReceiver<TrackerCommand>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        // Every facade handle dropped: finish in-flight work
                        None => break,
                    }
                }
                event = events.recv() => {
                    if let Some(event) = event {
                        self.handle_session_event(event);
                    }
                }
            }
            self.reap_terminated();
        }
        debug!("Delivery loop shutting down");
    }

    /// Offline runs persisted by an earlier process lifetime get a fresh
    /// session that goes straight to reporting.
    fn rehydrate_persisted_sessions(&mut self) {
        let ids = match self.store.persisted_session_ids() {
            Ok(ids) => ids,
            Err(error) => {
                warn!(%error, "Cannot enumerate persisted sessions");
                return;
            }
        };
        for session_id in ids {
            info!(session_id = %session_id, "Rehydrating persisted offline session");
            let mut session = MediaOfflineSession::new(
                session_id.clone(),
                self.analytics.clone(),
                self.network.clone(),
                self.store.clone(),
                self.events.clone(),
            );
            session.end();
            if !session.is_terminated() {
                self.sessions.insert(session_id, Box::new(session));
            }
        }
    }

    fn handle_command(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::CreateSession { session_id, config } => {
                let session: Box<dyn MediaSession> = if config.downloaded_content {
                    Box::new(MediaOfflineSession::new(
                        session_id.clone(),
                        self.analytics.clone(),
                        self.network.clone(),
                        self.store.clone(),
                        self.events.clone(),
                    ))
                } else {
                    Box::new(MediaRealTimeSession::new(
                        session_id.clone(),
                        self.analytics.clone(),
                        self.network.clone(),
                        self.events.clone(),
                    ))
                };
                debug!(session_id = %session_id, offline = config.downloaded_content,
                       "Delivery session created");
                self.sessions.insert(session_id, session);
            }
            TrackerCommand::ProcessHit { session_id, hit } => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.queue(hit);
                }
            }
            TrackerCommand::EndSession { session_id } => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.end();
                }
            }
            TrackerCommand::AnalyticsUpdated => {
                let opted_out = self
                    .analytics
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .privacy
                    == PrivacyStatus::OptedOut;
                if opted_out {
                    info!(sessions = self.sessions.len(), "Privacy opt-out, aborting all sessions");
                    for session in self.sessions.values_mut() {
                        session.abort();
                    }
                } else {
                    for session in self.sessions.values_mut() {
                        session.notify_update();
                    }
                }
            }
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::TransferComplete {
                session_id,
                outcome,
            } => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.handle_outcome(outcome);
                }
            }
            SessionEvent::RetryElapsed { session_id } => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.handle_retry();
                }
            }
        }
    }

    fn reap_terminated(&mut self) {
        self.sessions.retain(|_, session| !session.is_terminated());
    }
}
