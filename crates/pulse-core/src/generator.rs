//! MediaCollectionHitGenerator - translates accepted semantic events into hits
//!
//! Owns ping cadence, QoE deduplication, and the hit-processor session
//! lifecycle. The processor session id is obtained once, synchronously, at
//! construction; if creation fails the generator is permanently non-tracking
//! and silently drops every subsequent hit.

use crate::context::MediaContext;
use crate::hit::{param_keys, MediaHit};
use crate::types::{
    EventType, ParamValue, Params, PlaybackState, QoeInfo, TrackerConfig,
    PING_INTERVAL_GRANULAR_AD_MS, PING_INTERVAL_OFFLINE_MS, PING_INTERVAL_REALTIME_MS,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Session parameters handed to the processor at creation
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    pub downloaded_content: bool,
}

/// Capability interface consumed by the hit generator.
///
/// Implementations must not block: hits are handed off to a serial executor
/// and delivered asynchronously.
pub trait MediaProcessor: Send + Sync {
    /// Creates a delivery session; `None` when tracking is unavailable
    /// (e.g. privacy opted out)
    fn create_session(&self, config: SessionConfig) -> Option<String>;
    /// Accepts one hit for ordered delivery. Unknown ids are ignored.
    fn process_hit(&self, session_id: &str, hit: MediaHit);
    /// Ends the session once every queued hit has been handed over
    fn end_session(&self, session_id: &str);
}

pub struct MediaCollectionHitGenerator {
    processor: Arc<dyn MediaProcessor>,
    config: TrackerConfig,
    /// None when session creation failed: permanently non-tracking
    session_id: Option<String>,
    last_reported_state: PlaybackState,
    /// Interval timer origin for the ping cadence
    last_state_ts: i64,
    last_qoe: Option<QoeInfo>,
    /// Armed by the first Init -> Playing transition; the next cadence check
    /// while still playing re-reports `play` at the tick where the playhead
    /// actually starts moving.
    awaiting_play_confirm: bool,
}

impl MediaCollectionHitGenerator {
    pub fn new(processor: Arc<dyn MediaProcessor>, config: TrackerConfig, ts: i64) -> Self {
        let session_id = processor.create_session(SessionConfig {
            downloaded_content: config.downloaded_content,
        });
        match &session_id {
            Some(id) => info!(session_id = %id, "Hit processor session created"),
            None => warn!("Hit processor session creation failed, tracking disabled"),
        }
        Self {
            processor,
            config,
            session_id,
            last_reported_state: PlaybackState::Init,
            last_state_ts: ts,
            last_qoe: None,
            awaiting_play_confirm: false,
        }
    }

    /// Emits `sessionStart`. `force_resume` marks sessions re-created after
    /// idle or max-length recovery.
    pub fn process_media_start(&mut self, ctx: &MediaContext, ts: i64, force_resume: bool) {
        let media = ctx.media();
        let mut params = Params::new();
        params.insert(
            param_keys::MEDIA_ID.to_string(),
            ParamValue::from(media.id.clone()),
        );
        params.insert(
            param_keys::MEDIA_NAME.to_string(),
            ParamValue::from(media.name.clone()),
        );
        params.insert(
            param_keys::MEDIA_LENGTH.to_string(),
            ParamValue::Double(media.length),
        );
        params.insert(
            param_keys::MEDIA_CONTENT_TYPE.to_string(),
            ParamValue::from(media.stream_type.clone()),
        );
        params.insert(
            param_keys::MEDIA_TYPE.to_string(),
            ParamValue::from(media.media_type.as_str()),
        );
        params.insert(
            param_keys::MEDIA_RESUMED.to_string(),
            ParamValue::Bool(media.resumed || force_resume),
        );
        params.insert(
            param_keys::MEDIA_DOWNLOADED.to_string(),
            ParamValue::Bool(self.config.downloaded_content),
        );

        let metadata = if ctx.metadata().is_empty() {
            None
        } else {
            Some(ctx.metadata().clone())
        };
        self.last_state_ts = ts;
        self.generate_hit(ctx, EventType::SessionStart, ts, Some(params), metadata, false);
    }

    pub fn process_media_complete(&mut self, ctx: &MediaContext, ts: i64) {
        self.generate_hit(ctx, EventType::SessionComplete, ts, None, None, false);
        self.end_tracking_session();
    }

    pub fn process_media_end(&mut self, ctx: &MediaContext, ts: i64) {
        self.generate_hit(ctx, EventType::SessionEnd, ts, None, None, false);
        self.end_tracking_session();
    }

    pub fn process_adbreak_start(&mut self, ctx: &MediaContext, ts: i64) {
        let mut params = Params::new();
        if let Some(ad_break) = ctx.ad_break() {
            params.insert(
                param_keys::ADBREAK_NAME.to_string(),
                ParamValue::from(ad_break.name.clone()),
            );
            params.insert(
                param_keys::ADBREAK_POSITION.to_string(),
                ParamValue::Int(ad_break.position),
            );
            params.insert(
                param_keys::ADBREAK_START_TIME.to_string(),
                ParamValue::Double(ad_break.start_time),
            );
        }
        self.generate_hit(ctx, EventType::AdBreakStart, ts, Some(params), None, false);
    }

    pub fn process_adbreak_complete(&mut self, ctx: &MediaContext, ts: i64) {
        self.generate_hit(ctx, EventType::AdBreakComplete, ts, None, None, false);
    }

    pub fn process_ad_start(&mut self, ctx: &MediaContext, ts: i64) {
        let mut params = Params::new();
        if let Some(ad) = ctx.ad() {
            params.insert(
                param_keys::AD_ID.to_string(),
                ParamValue::from(ad.id.clone()),
            );
            params.insert(
                param_keys::AD_NAME.to_string(),
                ParamValue::from(ad.name.clone()),
            );
            params.insert(
                param_keys::AD_POSITION.to_string(),
                ParamValue::Int(ad.position),
            );
            params.insert(
                param_keys::AD_LENGTH.to_string(),
                ParamValue::Double(ad.length),
            );
        }
        let metadata = if ctx.ad_metadata().is_empty() {
            None
        } else {
            Some(ctx.ad_metadata().clone())
        };
        self.generate_hit(ctx, EventType::AdStart, ts, Some(params), metadata, false);
    }

    pub fn process_ad_complete(&mut self, ctx: &MediaContext, ts: i64) {
        self.generate_hit(ctx, EventType::AdComplete, ts, None, None, false);
    }

    pub fn process_ad_skip(&mut self, ctx: &MediaContext, ts: i64) {
        self.generate_hit(ctx, EventType::AdSkip, ts, None, None, false);
    }

    pub fn process_chapter_start(&mut self, ctx: &MediaContext, ts: i64) {
        let mut params = Params::new();
        if let Some(chapter) = ctx.chapter() {
            params.insert(
                param_keys::CHAPTER_NAME.to_string(),
                ParamValue::from(chapter.name.clone()),
            );
            params.insert(
                param_keys::CHAPTER_POSITION.to_string(),
                ParamValue::Int(chapter.position),
            );
            params.insert(
                param_keys::CHAPTER_LENGTH.to_string(),
                ParamValue::Double(chapter.length),
            );
            params.insert(
                param_keys::CHAPTER_START_TIME.to_string(),
                ParamValue::Double(chapter.start_time),
            );
        }
        let metadata = if ctx.chapter_metadata().is_empty() {
            None
        } else {
            Some(ctx.chapter_metadata().clone())
        };
        self.generate_hit(ctx, EventType::ChapterStart, ts, Some(params), metadata, false);
    }

    pub fn process_chapter_complete(&mut self, ctx: &MediaContext, ts: i64) {
        self.generate_hit(ctx, EventType::ChapterComplete, ts, None, None, false);
    }

    pub fn process_chapter_skip(&mut self, ctx: &MediaContext, ts: i64) {
        self.generate_hit(ctx, EventType::ChapterSkip, ts, None, None, false);
    }

    pub fn process_state_start(&mut self, ctx: &MediaContext, ts: i64, state_name: &str) {
        let mut params = Params::new();
        params.insert(
            param_keys::STATE_NAME.to_string(),
            ParamValue::from(state_name),
        );
        self.generate_hit(ctx, EventType::StateStart, ts, Some(params), None, false);
    }

    pub fn process_state_end(&mut self, ctx: &MediaContext, ts: i64, state_name: &str) {
        let mut params = Params::new();
        params.insert(
            param_keys::STATE_NAME.to_string(),
            ParamValue::from(state_name),
        );
        self.generate_hit(ctx, EventType::StateEnd, ts, Some(params), None, false);
    }

    pub fn process_error(&mut self, ctx: &MediaContext, ts: i64, error_id: &str) {
        let mut params = Params::new();
        params.insert(param_keys::ERROR_ID.to_string(), ParamValue::from(error_id));
        params.insert(
            param_keys::ERROR_SOURCE.to_string(),
            ParamValue::from(param_keys::ERROR_SOURCE_PLAYER),
        );
        self.generate_hit(ctx, EventType::Error, ts, Some(params), None, true);
    }

    pub fn process_bitrate_change(&mut self, ctx: &MediaContext, ts: i64) {
        self.generate_hit(ctx, EventType::BitrateChange, ts, None, None, true);
    }

    /// Ping cadence. Emits the transition hit when the derived playback state
    /// changed (or `flush` forces one); otherwise emits one catch-up `ping`
    /// per whole interval elapsed, each stamped at its own interval boundary.
    pub fn process_playback(&mut self, ctx: &MediaContext, ts: i64, flush: bool) {
        if self.session_id.is_none() {
            return;
        }
        let state = ctx.derived_playback_state();

        if flush || state != self.last_reported_state {
            let from_init = self.last_reported_state == PlaybackState::Init;
            self.generate_hit(ctx, state.transition_event(), ts, None, None, false);
            self.awaiting_play_confirm = !flush && from_init && state == PlaybackState::Playing;
            self.last_reported_state = state;
            self.last_state_ts = ts;
        } else if self.awaiting_play_confirm && state == PlaybackState::Playing {
            // First cadence check after playback began: report the playhead
            // actually moving as a second play hit.
            self.generate_hit(ctx, EventType::Play, ts, None, None, false);
            self.awaiting_play_confirm = false;
            self.last_state_ts = ts;
        } else {
            let interval = self.ping_interval(ctx);
            while ts - self.last_state_ts >= interval {
                self.last_state_ts += interval;
                self.generate_hit(ctx, EventType::Ping, self.last_state_ts, None, None, false);
            }
        }
    }

    fn ping_interval(&self, ctx: &MediaContext) -> i64 {
        if ctx.ad().is_some() && ctx.media().granular_ad_tracking {
            PING_INTERVAL_GRANULAR_AD_MS
        } else if self.config.downloaded_content {
            PING_INTERVAL_OFFLINE_MS
        } else {
            PING_INTERVAL_REALTIME_MS
        }
    }

    fn end_tracking_session(&mut self) {
        if let Some(id) = self.session_id.take() {
            info!(session_id = %id, "Ending hit processor session");
            self.processor.end_session(&id);
        }
    }

    fn generate_hit(
        &mut self,
        ctx: &MediaContext,
        event_type: EventType,
        ts: i64,
        params: Option<Params>,
        custom_metadata: Option<HashMap<String, String>>,
        explicit_qoe: bool,
    ) {
        let Some(session_id) = &self.session_id else {
            debug!(event = %event_type, "No processor session, dropping hit");
            return;
        };

        // QoE dedup: error/bitrate hits always carry the current sample;
        // everything else only when it changed since last reported.
        let qoe = if explicit_qoe {
            self.last_qoe = ctx.qoe().cloned();
            ctx.qoe().cloned()
        } else if ctx.qoe() != self.last_qoe.as_ref() {
            self.last_qoe = ctx.qoe().cloned();
            ctx.qoe().cloned()
        } else {
            None
        };
        let qoe_data = qoe.map(|q| qoe_to_params(&q));

        let hit = MediaHit::new(
            event_type,
            ctx.playhead(),
            ts,
            params,
            custom_metadata,
            qoe_data,
        );
        debug!(session_id = %session_id, event = %event_type, ts, "Generated hit");
        self.processor.process_hit(session_id, hit);
    }
}

fn qoe_to_params(qoe: &QoeInfo) -> Params {
    let mut params = Params::new();
    params.insert(
        param_keys::QOE_BITRATE.to_string(),
        ParamValue::Double(qoe.bitrate),
    );
    params.insert(
        param_keys::QOE_DROPPED_FRAMES.to_string(),
        ParamValue::Double(qoe.dropped_frames),
    );
    params.insert(param_keys::QOE_FPS.to_string(), ParamValue::Double(qoe.fps));
    params.insert(
        param_keys::QOE_STARTUP_TIME.to_string(),
        ParamValue::Double(qoe.startup_time),
    );
    params
}
