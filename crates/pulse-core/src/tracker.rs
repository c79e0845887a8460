//! MediaEventTracker - validator / state machine for player lifecycle calls
//!
//! Each public call maps to a rule; a rule either rejects (context unchanged,
//! no hit) or mutates the context and forwards the accepted semantic event to
//! the hit generator. A single call may trigger implicit follow-on mutations,
//! e.g. an AdBreakStart while another break is open closes the old break and
//! its ad first.
//!
//! The tracker also owns idle detection (30 minutes without playback ends the
//! session, resumed on the next play), the 24 hour session-length cap
//! (restarted in place), and the preroll window that lets pre-content ads
//! reorder ahead of the first play.

use crate::context::MediaContext;
use crate::generator::{MediaCollectionHitGenerator, MediaProcessor};
use crate::types::{
    AdBreakInfo, AdInfo, ChapterInfo, MediaInfo, PlaybackState, QoeInfo, StateInfo, TrackerConfig,
    IDLE_TIMEOUT_MS, MAX_SESSION_LENGTH_MS,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inbound call surface accepted from the public facade, with payloads
#[derive(Debug, Clone)]
pub enum MediaEvent {
    SessionStart {
        info: MediaInfo,
        metadata: HashMap<String, String>,
    },
    Play,
    Pause,
    SessionEnd,
    Complete,
    Error {
        error_id: String,
    },
    AdBreakStart {
        info: AdBreakInfo,
    },
    AdBreakComplete,
    AdStart {
        info: AdInfo,
        metadata: HashMap<String, String>,
    },
    AdComplete,
    AdSkip,
    ChapterStart {
        info: ChapterInfo,
        metadata: HashMap<String, String>,
    },
    ChapterComplete,
    ChapterSkip,
    StateStart {
        info: StateInfo,
    },
    StateEnd {
        info: StateInfo,
    },
    BufferStart,
    BufferComplete,
    SeekStart,
    SeekComplete,
    BitrateChange,
    PlayheadUpdate {
        playhead: f64,
    },
    QoeUpdate {
        info: QoeInfo,
    },
}

impl MediaEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MediaEvent::SessionStart { .. } => "sessionStart",
            MediaEvent::Play => "play",
            MediaEvent::Pause => "pause",
            MediaEvent::SessionEnd => "sessionEnd",
            MediaEvent::Complete => "complete",
            MediaEvent::Error { .. } => "error",
            MediaEvent::AdBreakStart { .. } => "adBreakStart",
            MediaEvent::AdBreakComplete => "adBreakComplete",
            MediaEvent::AdStart { .. } => "adStart",
            MediaEvent::AdComplete => "adComplete",
            MediaEvent::AdSkip => "adSkip",
            MediaEvent::ChapterStart { .. } => "chapterStart",
            MediaEvent::ChapterComplete => "chapterComplete",
            MediaEvent::ChapterSkip => "chapterSkip",
            MediaEvent::StateStart { .. } => "stateStart",
            MediaEvent::StateEnd { .. } => "stateEnd",
            MediaEvent::BufferStart => "bufferStart",
            MediaEvent::BufferComplete => "bufferComplete",
            MediaEvent::SeekStart => "seekStart",
            MediaEvent::SeekComplete => "seekComplete",
            MediaEvent::BitrateChange => "bitrateChange",
            MediaEvent::PlayheadUpdate { .. } => "playheadUpdate",
            MediaEvent::QoeUpdate { .. } => "qoeUpdate",
        }
    }

    /// Play, pause and chapter calls wait out the preroll window so an ad
    /// break arriving in the same batch is processed first.
    fn is_preroll_deferrable(&self) -> bool {
        matches!(
            self,
            MediaEvent::Play
                | MediaEvent::Pause
                | MediaEvent::ChapterStart { .. }
                | MediaEvent::ChapterComplete
                | MediaEvent::ChapterSkip
        )
    }
}

/// Why a rule rejected a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleViolation {
    NotInSession,
    AlreadyInSession,
    InvalidDescriptor,
    DuplicateDescriptor,
    AlreadyBuffering,
    AlreadySeeking,
    NotBuffering,
    NotSeeking,
    NoActiveAdBreak,
    NoActiveAd,
    NoActiveChapter,
    StateAlreadyActive,
    StateNotActive,
    StateLimitReached,
    MissingErrorId,
}

impl std::fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            RuleViolation::NotInSession => "no session in progress",
            RuleViolation::AlreadyInSession => "session already in progress",
            RuleViolation::InvalidDescriptor => "structurally invalid descriptor",
            RuleViolation::DuplicateDescriptor => "duplicate descriptor",
            RuleViolation::AlreadyBuffering => "buffer already in progress",
            RuleViolation::AlreadySeeking => "seek already in progress",
            RuleViolation::NotBuffering => "no buffer in progress",
            RuleViolation::NotSeeking => "no seek in progress",
            RuleViolation::NoActiveAdBreak => "no active ad break",
            RuleViolation::NoActiveAd => "no active ad",
            RuleViolation::NoActiveChapter => "no active chapter",
            RuleViolation::StateAlreadyActive => "state already active",
            RuleViolation::StateNotActive => "state not active",
            RuleViolation::StateLimitReached => "active state limit reached",
            RuleViolation::MissingErrorId => "empty error id",
        };
        write!(f, "{reason}")
    }
}

/// Tagged result of running one call through its rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Accepted,
    Rejected(RuleViolation),
}

impl RuleOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RuleOutcome::Accepted)
    }
}

pub struct MediaEventTracker {
    processor: Arc<dyn MediaProcessor>,
    config: TrackerConfig,
    /// None while NotStarted
    context: Option<MediaContext>,
    /// None while NotStarted or Idle
    generator: Option<MediaCollectionHitGenerator>,
    in_preroll: bool,
    preroll_queue: Vec<(MediaEvent, i64)>,
    session_start_ts: i64,
    /// Last reference timestamp at which the session was in active playback
    last_playback_ts: i64,
    idle: bool,
}

impl MediaEventTracker {
    pub fn new(processor: Arc<dyn MediaProcessor>, config: TrackerConfig) -> Self {
        Self {
            processor,
            config,
            context: None,
            generator: None,
            in_preroll: false,
            preroll_queue: Vec::new(),
            session_start_ts: 0,
            last_playback_ts: 0,
            idle: false,
        }
    }

    pub fn is_in_session(&self) -> bool {
        self.context.is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Runs one call through its rule. `ts` is the caller-supplied reference
    /// timestamp in milliseconds, expected non-decreasing.
    pub fn track(&mut self, event: MediaEvent, ts: i64) -> RuleOutcome {
        let outcome = self.dispatch(event, ts);
        if let RuleOutcome::Rejected(violation) = outcome {
            warn!(reason = %violation, "Rejected media event");
        }
        outcome
    }

    fn dispatch(&mut self, event: MediaEvent, ts: i64) -> RuleOutcome {
        let event = match event {
            MediaEvent::SessionStart { info, metadata } => {
                if self.context.is_some() {
                    return RuleOutcome::Rejected(RuleViolation::AlreadyInSession);
                }
                return self.start_session(info, metadata, ts);
            }
            other => other,
        };
        if self.context.is_none() {
            return RuleOutcome::Rejected(RuleViolation::NotInSession);
        }

        // Session recovery. The 24 hour cap outranks idle detection so an
        // overlong session restarts instead of going idle.
        if !self.idle && ts - self.session_start_ts >= MAX_SESSION_LENGTH_MS {
            info!("Session exceeded maximum length, restarting");
            if let (Some(ctx), Some(generator)) = (self.context.as_ref(), self.generator.as_mut())
            {
                generator.process_media_end(ctx, ts);
            }
            self.resume_session(ts);
        } else if !self.idle && ts - self.last_playback_ts >= IDLE_TIMEOUT_MS {
            info!("Session idle for 30 minutes, ending delivery");
            if let (Some(ctx), Some(generator)) = (self.context.as_ref(), self.generator.as_mut())
            {
                generator.process_media_end(ctx, ts);
            }
            self.generator = None;
            self.idle = true;
        }
        if self.idle && matches!(event, MediaEvent::Play) {
            info!("Play after idle, resuming session");
            self.resume_session(ts);
        }

        // Preroll window: close on ad break, session end, or elapsed wait;
        // defer play/pause/chapter calls until it closes.
        if self.in_preroll {
            let preroll_wait = self
                .context
                .as_ref()
                .map(|c| c.media().preroll_wait_ms)
                .unwrap_or(0);
            let closes = matches!(
                event,
                MediaEvent::AdBreakStart { .. } | MediaEvent::SessionEnd | MediaEvent::Complete
            ) || ts - self.session_start_ts >= preroll_wait;

            if closes {
                self.in_preroll = false;
                if matches!(event, MediaEvent::AdBreakStart { .. }) {
                    // The ad-related call wins the batch: process it before
                    // the deferred prefix.
                    let outcome = self.apply(event, ts);
                    self.replay_preroll_queue();
                    return outcome;
                }
                self.replay_preroll_queue();
            } else if event.is_preroll_deferrable() {
                debug!(event = event.name(), "Deferring call inside preroll window");
                self.preroll_queue.push((event, ts));
                return RuleOutcome::Accepted;
            }
        }

        self.apply(event, ts)
    }

    fn replay_preroll_queue(&mut self) {
        let queued = std::mem::take(&mut self.preroll_queue);
        for (event, event_ts) in queued {
            let name = event.name();
            let outcome = self.apply(event, event_ts);
            if let RuleOutcome::Rejected(violation) = outcome {
                warn!(event = name, reason = %violation, "Rejected deferred preroll event");
            }
        }
    }

    fn start_session(
        &mut self,
        info: MediaInfo,
        metadata: HashMap<String, String>,
        ts: i64,
    ) -> RuleOutcome {
        if !info.is_valid() {
            return RuleOutcome::Rejected(RuleViolation::InvalidDescriptor);
        }
        let in_preroll = info.preroll_wait_ms > 0;
        let ctx = MediaContext::new(info, &metadata);
        let mut generator =
            MediaCollectionHitGenerator::new(self.processor.clone(), self.config, ts);
        generator.process_media_start(&ctx, ts, false);

        self.context = Some(ctx);
        self.generator = Some(generator);
        self.session_start_ts = ts;
        self.last_playback_ts = ts;
        self.idle = false;
        self.in_preroll = in_preroll;
        self.preroll_queue.clear();
        RuleOutcome::Accepted
    }

    /// Ends tracking and returns to NotStarted; only SessionStart is legal
    /// afterwards.
    fn teardown_session(&mut self) {
        self.context = None;
        self.generator = None;
        self.idle = false;
        self.in_preroll = false;
        self.preroll_queue.clear();
    }

    /// Re-creates the delivery session and replays still-open context:
    /// chapter, ad break, ad, then named states in insertion order, followed
    /// by a forced playback-state flush.
    fn resume_session(&mut self, ts: i64) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let mut generator =
            MediaCollectionHitGenerator::new(self.processor.clone(), self.config, ts);
        generator.process_media_start(ctx, ts, true);
        if ctx.chapter().is_some() {
            generator.process_chapter_start(ctx, ts);
        }
        if ctx.ad_break().is_some() {
            generator.process_adbreak_start(ctx, ts);
        }
        if ctx.ad().is_some() {
            generator.process_ad_start(ctx, ts);
        }
        for state in ctx.active_states() {
            generator.process_state_start(ctx, ts, &state.state_name);
        }
        generator.process_playback(ctx, ts, true);

        self.generator = Some(generator);
        self.session_start_ts = ts;
        self.last_playback_ts = ts;
        self.idle = false;
    }

    fn apply(&mut self, event: MediaEvent, ts: i64) -> RuleOutcome {
        let Some(ctx) = self.context.as_mut() else {
            return RuleOutcome::Rejected(RuleViolation::NotInSession);
        };

        let outcome = match event {
            MediaEvent::SessionStart { .. } => {
                RuleOutcome::Rejected(RuleViolation::AlreadyInSession)
            }

            MediaEvent::Play => {
                ctx.enter_playback_state(PlaybackState::Playing);
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_playback(ctx, ts, false);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::Pause => {
                ctx.enter_playback_state(PlaybackState::Paused);
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_playback(ctx, ts, false);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::BufferStart => {
                if ctx.is_in_playback_state(PlaybackState::Buffering) {
                    return RuleOutcome::Rejected(RuleViolation::AlreadyBuffering);
                }
                if ctx.is_in_playback_state(PlaybackState::Seeking) {
                    return RuleOutcome::Rejected(RuleViolation::AlreadySeeking);
                }
                ctx.enter_playback_state(PlaybackState::Buffering);
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_playback(ctx, ts, false);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::BufferComplete => {
                if !ctx.is_in_playback_state(PlaybackState::Buffering) {
                    return RuleOutcome::Rejected(RuleViolation::NotBuffering);
                }
                ctx.exit_playback_state(PlaybackState::Buffering);
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_playback(ctx, ts, false);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::SeekStart => {
                if ctx.is_in_playback_state(PlaybackState::Seeking) {
                    return RuleOutcome::Rejected(RuleViolation::AlreadySeeking);
                }
                if ctx.is_in_playback_state(PlaybackState::Buffering) {
                    return RuleOutcome::Rejected(RuleViolation::AlreadyBuffering);
                }
                ctx.enter_playback_state(PlaybackState::Seeking);
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_playback(ctx, ts, false);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::SeekComplete => {
                if !ctx.is_in_playback_state(PlaybackState::Seeking) {
                    return RuleOutcome::Rejected(RuleViolation::NotSeeking);
                }
                ctx.exit_playback_state(PlaybackState::Seeking);
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_playback(ctx, ts, false);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::AdBreakStart { info } => {
                if !info.is_valid() {
                    return RuleOutcome::Rejected(RuleViolation::InvalidDescriptor);
                }
                if ctx.ad_break() == Some(&info) {
                    return RuleOutcome::Rejected(RuleViolation::DuplicateDescriptor);
                }
                // A different descriptor replaces the current break,
                // implicitly closing it and any open ad.
                if ctx.ad_break().is_some() {
                    ctx.clear_ad();
                    ctx.clear_ad_break();
                    if let Some(generator) = self.generator.as_mut() {
                        generator.process_adbreak_complete(ctx, ts);
                    }
                }
                ctx.set_ad_break(info);
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_adbreak_start(ctx, ts);
                }
                self.in_preroll = false;
                RuleOutcome::Accepted
            }

            MediaEvent::AdBreakComplete => {
                if ctx.ad_break().is_none() {
                    return RuleOutcome::Rejected(RuleViolation::NoActiveAdBreak);
                }
                // Clears any open ad with no extra hit beyond adBreakComplete
                ctx.clear_ad();
                ctx.clear_ad_break();
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_adbreak_complete(ctx, ts);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::AdStart { info, metadata } => {
                if ctx.ad_break().is_none() {
                    return RuleOutcome::Rejected(RuleViolation::NoActiveAdBreak);
                }
                if !info.is_valid() {
                    return RuleOutcome::Rejected(RuleViolation::InvalidDescriptor);
                }
                if ctx.ad() == Some(&info) {
                    return RuleOutcome::Rejected(RuleViolation::DuplicateDescriptor);
                }
                if ctx.ad().is_some() {
                    if let Some(generator) = self.generator.as_mut() {
                        generator.process_ad_complete(ctx, ts);
                    }
                    ctx.clear_ad();
                }
                ctx.set_ad(info, &metadata);
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_ad_start(ctx, ts);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::AdComplete => {
                if ctx.ad().is_none() {
                    return RuleOutcome::Rejected(RuleViolation::NoActiveAd);
                }
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_ad_complete(ctx, ts);
                }
                ctx.clear_ad();
                RuleOutcome::Accepted
            }

            MediaEvent::AdSkip => {
                if ctx.ad().is_none() {
                    return RuleOutcome::Rejected(RuleViolation::NoActiveAd);
                }
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_ad_skip(ctx, ts);
                }
                ctx.clear_ad();
                RuleOutcome::Accepted
            }

            MediaEvent::ChapterStart { info, metadata } => {
                if !info.is_valid() {
                    return RuleOutcome::Rejected(RuleViolation::InvalidDescriptor);
                }
                if ctx.chapter() == Some(&info) {
                    return RuleOutcome::Rejected(RuleViolation::DuplicateDescriptor);
                }
                if ctx.chapter().is_some() {
                    if let Some(generator) = self.generator.as_mut() {
                        generator.process_chapter_complete(ctx, ts);
                    }
                    ctx.clear_chapter();
                }
                ctx.set_chapter(info, &metadata);
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_chapter_start(ctx, ts);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::ChapterComplete => {
                if ctx.chapter().is_none() {
                    return RuleOutcome::Rejected(RuleViolation::NoActiveChapter);
                }
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_chapter_complete(ctx, ts);
                }
                ctx.clear_chapter();
                RuleOutcome::Accepted
            }

            MediaEvent::ChapterSkip => {
                if ctx.chapter().is_none() {
                    return RuleOutcome::Rejected(RuleViolation::NoActiveChapter);
                }
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_chapter_skip(ctx, ts);
                }
                ctx.clear_chapter();
                RuleOutcome::Accepted
            }

            MediaEvent::StateStart { info } => {
                if !info.is_valid() {
                    return RuleOutcome::Rejected(RuleViolation::InvalidDescriptor);
                }
                if ctx.is_state_active(&info.state_name) {
                    return RuleOutcome::Rejected(RuleViolation::StateAlreadyActive);
                }
                if !ctx.start_state(&info) {
                    return RuleOutcome::Rejected(RuleViolation::StateLimitReached);
                }
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_state_start(ctx, ts, &info.state_name);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::StateEnd { info } => {
                if !ctx.end_state(&info) {
                    return RuleOutcome::Rejected(RuleViolation::StateNotActive);
                }
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_state_end(ctx, ts, &info.state_name);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::Error { error_id } => {
                if error_id.is_empty() {
                    return RuleOutcome::Rejected(RuleViolation::MissingErrorId);
                }
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_error(ctx, ts, &error_id);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::BitrateChange => {
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_bitrate_change(ctx, ts);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::QoeUpdate { info } => {
                if !info.is_valid() {
                    return RuleOutcome::Rejected(RuleViolation::InvalidDescriptor);
                }
                ctx.set_qoe(info);
                RuleOutcome::Accepted
            }

            MediaEvent::PlayheadUpdate { playhead } => {
                ctx.set_playhead(playhead);
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_playback(ctx, ts, false);
                }
                RuleOutcome::Accepted
            }

            MediaEvent::SessionEnd => {
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_media_end(ctx, ts);
                }
                self.teardown_session();
                return RuleOutcome::Accepted;
            }

            MediaEvent::Complete => {
                if let Some(generator) = self.generator.as_mut() {
                    generator.process_media_complete(ctx, ts);
                }
                self.teardown_session();
                return RuleOutcome::Accepted;
            }
        };

        if outcome.is_accepted() {
            if let Some(ctx) = self.context.as_ref() {
                if ctx.derived_playback_state() == PlaybackState::Playing {
                    self.last_playback_ts = ts;
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::SessionConfig;
    use crate::hit::MediaHit;
    use crate::types::{EventType, MediaType};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct RecordingProcessor {
        hits: Mutex<Vec<MediaHit>>,
        sessions_created: AtomicU32,
        sessions_ended: AtomicU32,
    }

    impl RecordingProcessor {
        fn new() -> Self {
            Self {
                hits: Mutex::new(Vec::new()),
                sessions_created: AtomicU32::new(0),
                sessions_ended: AtomicU32::new(0),
            }
        }

        fn event_types(&self) -> Vec<EventType> {
            self.hits
                .lock()
                .unwrap()
                .iter()
                .map(|h| h.event_type())
                .collect()
        }
    }

    impl MediaProcessor for RecordingProcessor {
        fn create_session(&self, _config: SessionConfig) -> Option<String> {
            let n = self.sessions_created.fetch_add(1, Ordering::SeqCst);
            Some(format!("session-{n}"))
        }

        fn process_hit(&self, _session_id: &str, hit: MediaHit) {
            self.hits.lock().unwrap().push(hit);
        }

        fn end_session(&self, _session_id: &str) {
            self.sessions_ended.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn media_info() -> MediaInfo {
        MediaInfo::new("id1", "Name", "vod", MediaType::Video, 60.0).with_preroll_wait_ms(0)
    }

    fn tracker() -> (Arc<RecordingProcessor>, MediaEventTracker) {
        let processor = Arc::new(RecordingProcessor::new());
        let tracker = MediaEventTracker::new(processor.clone(), TrackerConfig::default());
        (processor, tracker)
    }

    fn start(tracker: &mut MediaEventTracker, ts: i64) {
        let outcome = tracker.track(
            MediaEvent::SessionStart {
                info: media_info(),
                metadata: HashMap::new(),
            },
            ts,
        );
        assert!(outcome.is_accepted());
    }

    #[test]
    fn test_everything_rejected_before_session_start() {
        let (processor, mut tracker) = tracker();
        for event in [
            MediaEvent::Play,
            MediaEvent::Pause,
            MediaEvent::AdBreakComplete,
            MediaEvent::BitrateChange,
            MediaEvent::PlayheadUpdate { playhead: 1.0 },
            MediaEvent::SessionEnd,
        ] {
            assert_eq!(
                tracker.track(event, 0),
                RuleOutcome::Rejected(RuleViolation::NotInSession)
            );
        }
        assert!(processor.hits.lock().unwrap().is_empty());
        assert_eq!(processor.sessions_created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_duplicate_session_start_rejected() {
        let (_, mut tracker) = tracker();
        start(&mut tracker, 0);
        let outcome = tracker.track(
            MediaEvent::SessionStart {
                info: media_info(),
                metadata: HashMap::new(),
            },
            100,
        );
        assert_eq!(
            outcome,
            RuleOutcome::Rejected(RuleViolation::AlreadyInSession)
        );
    }

    #[test]
    fn test_invalid_media_info_rejected() {
        let (processor, mut tracker) = tracker();
        let outcome = tracker.track(
            MediaEvent::SessionStart {
                info: MediaInfo::new("", "Name", "vod", MediaType::Video, 60.0),
                metadata: HashMap::new(),
            },
            0,
        );
        assert_eq!(
            outcome,
            RuleOutcome::Rejected(RuleViolation::InvalidDescriptor)
        );
        assert!(!tracker.is_in_session());
        assert_eq!(processor.sessions_created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ad_requires_open_break() {
        let (processor, mut tracker) = tracker();
        start(&mut tracker, 0);

        let outcome = tracker.track(
            MediaEvent::AdStart {
                info: AdInfo::new("ad1", "Ad", 1, 15.0),
                metadata: HashMap::new(),
            },
            100,
        );
        assert_eq!(
            outcome,
            RuleOutcome::Rejected(RuleViolation::NoActiveAdBreak)
        );

        tracker.track(
            MediaEvent::AdBreakStart {
                info: AdBreakInfo::new("preroll", 1, 0.0),
            },
            200,
        );
        let outcome = tracker.track(
            MediaEvent::AdStart {
                info: AdInfo::new("ad1", "Ad", 1, 15.0),
                metadata: HashMap::new(),
            },
            300,
        );
        assert!(outcome.is_accepted());

        // Completing the break while the ad is open clears both, with no
        // extra hit beyond adBreakComplete.
        assert!(tracker.track(MediaEvent::AdBreakComplete, 400).is_accepted());
        assert_eq!(
            tracker.track(MediaEvent::AdComplete, 500),
            RuleOutcome::Rejected(RuleViolation::NoActiveAd)
        );
        assert_eq!(
            processor.event_types(),
            vec![
                EventType::SessionStart,
                EventType::AdBreakStart,
                EventType::AdStart,
                EventType::AdBreakComplete,
            ]
        );
    }

    #[test]
    fn test_ad_break_replacement_closes_old_break() {
        let (processor, mut tracker) = tracker();
        start(&mut tracker, 0);
        tracker.track(
            MediaEvent::AdBreakStart {
                info: AdBreakInfo::new("break1", 1, 0.0),
            },
            100,
        );
        tracker.track(
            MediaEvent::AdStart {
                info: AdInfo::new("ad1", "Ad", 1, 15.0),
                metadata: HashMap::new(),
            },
            200,
        );

        // Same descriptor is a duplicate
        assert_eq!(
            tracker.track(
                MediaEvent::AdBreakStart {
                    info: AdBreakInfo::new("break1", 1, 0.0),
                },
                300,
            ),
            RuleOutcome::Rejected(RuleViolation::DuplicateDescriptor)
        );

        // A different descriptor replaces the old break and its ad
        assert!(tracker
            .track(
                MediaEvent::AdBreakStart {
                    info: AdBreakInfo::new("break2", 2, 30.0),
                },
                400,
            )
            .is_accepted());
        assert_eq!(
            processor.event_types(),
            vec![
                EventType::SessionStart,
                EventType::AdBreakStart,
                EventType::AdStart,
                EventType::AdBreakComplete,
                EventType::AdBreakStart,
            ]
        );
    }

    #[test]
    fn test_buffer_and_seek_exclusion() {
        let (_, mut tracker) = tracker();
        start(&mut tracker, 0);

        assert!(tracker.track(MediaEvent::BufferStart, 100).is_accepted());
        assert_eq!(
            tracker.track(MediaEvent::BufferStart, 200),
            RuleOutcome::Rejected(RuleViolation::AlreadyBuffering)
        );
        assert_eq!(
            tracker.track(MediaEvent::SeekStart, 300),
            RuleOutcome::Rejected(RuleViolation::AlreadyBuffering)
        );
        assert_eq!(
            tracker.track(MediaEvent::SeekComplete, 400),
            RuleOutcome::Rejected(RuleViolation::NotSeeking)
        );
        assert!(tracker.track(MediaEvent::BufferComplete, 500).is_accepted());
        assert_eq!(
            tracker.track(MediaEvent::BufferComplete, 600),
            RuleOutcome::Rejected(RuleViolation::NotBuffering)
        );
    }

    #[test]
    fn test_state_limit_and_reuse() {
        let (_, mut tracker) = tracker();
        start(&mut tracker, 0);

        for i in 0..10 {
            assert!(tracker
                .track(
                    MediaEvent::StateStart {
                        info: StateInfo::new(format!("state{i}")),
                    },
                    100,
                )
                .is_accepted());
        }
        assert_eq!(
            tracker.track(
                MediaEvent::StateStart {
                    info: StateInfo::new("state10"),
                },
                200,
            ),
            RuleOutcome::Rejected(RuleViolation::StateLimitReached)
        );
        assert_eq!(
            tracker.track(
                MediaEvent::StateStart {
                    info: StateInfo::new("state0"),
                },
                300,
            ),
            RuleOutcome::Rejected(RuleViolation::StateAlreadyActive)
        );
        assert!(tracker
            .track(
                MediaEvent::StateEnd {
                    info: StateInfo::new("state4"),
                },
                400,
            )
            .is_accepted());
        assert!(tracker
            .track(
                MediaEvent::StateStart {
                    info: StateInfo::new("state10"),
                },
                500,
            )
            .is_accepted());
    }

    #[test]
    fn test_nothing_but_session_start_after_end() {
        let (_, mut tracker) = tracker();
        start(&mut tracker, 0);
        assert!(tracker.track(MediaEvent::SessionEnd, 100).is_accepted());
        assert_eq!(
            tracker.track(MediaEvent::Play, 200),
            RuleOutcome::Rejected(RuleViolation::NotInSession)
        );
        start(&mut tracker, 300);
    }

    #[test]
    fn test_idle_after_30_minutes_paused() {
        let (processor, mut tracker) = tracker();
        start(&mut tracker, 0);
        tracker.track(MediaEvent::Play, 0);
        tracker.track(MediaEvent::PlayheadUpdate { playhead: 1.0 }, 1000);
        tracker.track(MediaEvent::Pause, 2000);

        // Ticks keep arriving but playback stays paused
        let idle_at = 1000 + IDLE_TIMEOUT_MS;
        tracker.track(MediaEvent::PlayheadUpdate { playhead: 1.0 }, idle_at);
        assert!(tracker.is_idle());
        let events = processor.event_types();
        assert_eq!(*events.last().unwrap(), EventType::SessionEnd);
        assert_eq!(processor.sessions_ended.load(Ordering::SeqCst), 1);

        // Context survives idle; the next play resumes with a new session
        let resume_at = idle_at + 1000;
        tracker.track(MediaEvent::Play, resume_at);
        assert!(!tracker.is_idle());
        assert_eq!(processor.sessions_created.load(Ordering::SeqCst), 2);
        let events = processor.event_types();
        let tail = &events[events.len() - 3..];
        // sessionStart(resumed), the forced playback flush, then the play
        assert_eq!(tail[0], EventType::SessionStart);
        assert_eq!(tail[1], EventType::PauseStart);
        assert_eq!(tail[2], EventType::Play);
    }

    #[test]
    fn test_24h_restart_replays_open_entities() {
        let (processor, mut tracker) = tracker();
        start(&mut tracker, 0);
        tracker.track(MediaEvent::Play, 0);
        tracker.track(
            MediaEvent::ChapterStart {
                info: ChapterInfo::new("chapter1", 1, 300.0, 0.0),
                metadata: HashMap::new(),
            },
            100,
        );
        tracker.track(
            MediaEvent::AdBreakStart {
                info: AdBreakInfo::new("midroll", 1, 30.0),
            },
            200,
        );
        tracker.track(
            MediaEvent::AdStart {
                info: AdInfo::new("ad1", "Ad", 1, 15.0),
                metadata: HashMap::new(),
            },
            300,
        );
        tracker.track(
            MediaEvent::StateStart {
                info: StateInfo::new("fullscreen"),
            },
            400,
        );
        tracker.track(
            MediaEvent::StateStart {
                info: StateInfo::new("mute"),
            },
            500,
        );

        let before = processor.event_types().len();
        // Tick every 25 minutes so idle never trips before the cap does
        let mut t: i64 = 500;
        while t < MAX_SESSION_LENGTH_MS {
            t += 1_500_000;
            tracker.track(
                MediaEvent::PlayheadUpdate { playhead: 50.0 },
                t.min(MAX_SESSION_LENGTH_MS),
            );
        }
        assert!(!tracker.is_idle());
        assert_eq!(processor.sessions_created.load(Ordering::SeqCst), 2);

        let events = processor.event_types();
        let restart = &events[before..];
        // sessionEnd for the old session, then the replayed entities in
        // order, then the forced flush
        let expected_tail = [
            EventType::SessionEnd,
            EventType::SessionStart,
            EventType::ChapterStart,
            EventType::AdBreakStart,
            EventType::AdStart,
            EventType::StateStart,
            EventType::StateStart,
            EventType::Play,
        ];
        let start_idx = restart
            .iter()
            .position(|e| *e == EventType::SessionEnd)
            .unwrap();
        assert_eq!(&restart[start_idx..start_idx + 8], &expected_tail);
    }

    #[test]
    fn test_preroll_reorders_ad_break_before_play() {
        let (processor, mut tracker) = tracker();
        let info = MediaInfo::new("id1", "Name", "vod", MediaType::Video, 60.0)
            .with_preroll_wait_ms(250);
        tracker.track(
            MediaEvent::SessionStart {
                info,
                metadata: HashMap::new(),
            },
            0,
        );

        // Play arrives first but must not finalize before the preroll ad
        assert!(tracker.track(MediaEvent::Play, 10).is_accepted());
        assert!(tracker
            .track(
                MediaEvent::AdBreakStart {
                    info: AdBreakInfo::new("preroll", 1, 0.0),
                },
                20,
            )
            .is_accepted());

        let events = processor.event_types();
        assert_eq!(
            events,
            vec![
                EventType::SessionStart,
                EventType::AdBreakStart,
                EventType::Play,
            ]
        );
    }

    #[test]
    fn test_preroll_window_closes_on_elapsed_wait() {
        let (processor, mut tracker) = tracker();
        let info = MediaInfo::new("id1", "Name", "vod", MediaType::Video, 60.0)
            .with_preroll_wait_ms(250);
        tracker.track(
            MediaEvent::SessionStart {
                info,
                metadata: HashMap::new(),
            },
            0,
        );
        tracker.track(MediaEvent::Play, 10);
        assert_eq!(processor.event_types(), vec![EventType::SessionStart]);

        // No ad showed up; the deferred play replays once the wait elapses
        tracker.track(MediaEvent::PlayheadUpdate { playhead: 0.3 }, 300);
        let events = processor.event_types();
        assert_eq!(events[1], EventType::Play);
    }

    #[test]
    fn test_error_requires_id() {
        let (_, mut tracker) = tracker();
        start(&mut tracker, 0);
        assert_eq!(
            tracker.track(
                MediaEvent::Error {
                    error_id: String::new(),
                },
                100,
            ),
            RuleOutcome::Rejected(RuleViolation::MissingErrorId)
        );
        assert!(tracker
            .track(
                MediaEvent::Error {
                    error_id: "net.timeout".to_string(),
                },
                200,
            )
            .is_accepted());
    }
}
