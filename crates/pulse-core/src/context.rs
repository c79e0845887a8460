//! MediaContext - mutable aggregate holding one session's live state
//!
//! Exclusively owned by the event tracker (single writer) and shared
//! read-only with the hit generator. Performs no I/O; every mutator reports
//! success or failure as a boolean.

use crate::types::{
    sanitize_metadata, AdBreakInfo, AdInfo, ChapterInfo, MediaInfo, PlaybackState, QoeInfo,
    StateInfo, MAX_ACTIVE_STATES,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Live state for one tracked media session
#[derive(Debug, Clone)]
pub struct MediaContext {
    media: MediaInfo,
    metadata: HashMap<String, String>,
    ad_break: Option<AdBreakInfo>,
    ad: Option<AdInfo>,
    ad_metadata: HashMap<String, String>,
    chapter: Option<ChapterInfo>,
    chapter_metadata: HashMap<String, String>,
    qoe: Option<QoeInfo>,
    playhead: f64,
    playback_flags: HashSet<PlaybackState>,
    /// Active named states in insertion order, bounded by MAX_ACTIVE_STATES
    active_states: Vec<StateInfo>,
}

impl MediaContext {
    /// Non-conforming metadata keys are dropped here, at storage time.
    pub fn new(media: MediaInfo, metadata: &HashMap<String, String>) -> Self {
        Self {
            media,
            metadata: sanitize_metadata(metadata),
            ad_break: None,
            ad: None,
            ad_metadata: HashMap::new(),
            chapter: None,
            chapter_metadata: HashMap::new(),
            qoe: None,
            playhead: 0.0,
            playback_flags: HashSet::new(),
            active_states: Vec::new(),
        }
    }

    pub fn media(&self) -> &MediaInfo {
        &self.media
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    // --- Ad break ---

    pub fn set_ad_break(&mut self, info: AdBreakInfo) {
        self.ad_break = Some(info);
    }

    pub fn clear_ad_break(&mut self) {
        self.ad_break = None;
    }

    pub fn ad_break(&self) -> Option<&AdBreakInfo> {
        self.ad_break.as_ref()
    }

    // --- Ad ---

    pub fn set_ad(&mut self, info: AdInfo, metadata: &HashMap<String, String>) {
        self.ad = Some(info);
        self.ad_metadata = sanitize_metadata(metadata);
    }

    pub fn clear_ad(&mut self) {
        self.ad = None;
        self.ad_metadata.clear();
    }

    pub fn ad(&self) -> Option<&AdInfo> {
        self.ad.as_ref()
    }

    pub fn ad_metadata(&self) -> &HashMap<String, String> {
        &self.ad_metadata
    }

    // --- Chapter ---

    pub fn set_chapter(&mut self, info: ChapterInfo, metadata: &HashMap<String, String>) {
        self.chapter = Some(info);
        self.chapter_metadata = sanitize_metadata(metadata);
    }

    pub fn clear_chapter(&mut self) {
        self.chapter = None;
        self.chapter_metadata.clear();
    }

    pub fn chapter(&self) -> Option<&ChapterInfo> {
        self.chapter.as_ref()
    }

    pub fn chapter_metadata(&self) -> &HashMap<String, String> {
        &self.chapter_metadata
    }

    // --- QoE ---

    pub fn set_qoe(&mut self, qoe: QoeInfo) {
        self.qoe = Some(qoe);
    }

    pub fn qoe(&self) -> Option<&QoeInfo> {
        self.qoe.as_ref()
    }

    // --- Playhead ---

    /// Negative or non-finite values are ignored
    pub fn set_playhead(&mut self, playhead: f64) {
        if playhead.is_finite() && playhead >= 0.0 {
            self.playhead = playhead;
        } else {
            debug!(playhead, "Ignoring invalid playhead value");
        }
    }

    pub fn playhead(&self) -> f64 {
        self.playhead
    }

    // --- Playback-state flags ---

    /// Playing and Paused are mutually exclusive; Buffering and Seeking
    /// overlap either.
    pub fn enter_playback_state(&mut self, state: PlaybackState) {
        match state {
            PlaybackState::Playing => {
                self.playback_flags.remove(&PlaybackState::Paused);
                self.playback_flags.insert(PlaybackState::Playing);
            }
            PlaybackState::Paused => {
                self.playback_flags.remove(&PlaybackState::Playing);
                self.playback_flags.insert(PlaybackState::Paused);
            }
            PlaybackState::Buffering | PlaybackState::Seeking => {
                self.playback_flags.insert(state);
            }
            PlaybackState::Init => {}
        }
    }

    pub fn exit_playback_state(&mut self, state: PlaybackState) {
        self.playback_flags.remove(&state);
    }

    pub fn is_in_playback_state(&self, state: PlaybackState) -> bool {
        self.playback_flags.contains(&state)
    }

    /// Reported state by precedence: Buffer > Seek > Play > Pause, else Init
    pub fn derived_playback_state(&self) -> PlaybackState {
        for state in [
            PlaybackState::Buffering,
            PlaybackState::Seeking,
            PlaybackState::Playing,
            PlaybackState::Paused,
        ] {
            if self.playback_flags.contains(&state) {
                return state;
            }
        }
        PlaybackState::Init
    }

    // --- Named states ---

    /// Fails on duplicate name or when MAX_ACTIVE_STATES are already active
    pub fn start_state(&mut self, info: &StateInfo) -> bool {
        if self.is_state_active(&info.state_name) {
            return false;
        }
        if self.active_states.len() >= MAX_ACTIVE_STATES {
            debug!(
                state = %info.state_name,
                limit = MAX_ACTIVE_STATES,
                "Active state limit reached"
            );
            return false;
        }
        self.active_states.push(info.clone());
        true
    }

    /// Fails when the named state is not active
    pub fn end_state(&mut self, info: &StateInfo) -> bool {
        let before = self.active_states.len();
        self.active_states
            .retain(|s| s.state_name != info.state_name);
        self.active_states.len() != before
    }

    pub fn is_state_active(&self, name: &str) -> bool {
        self.active_states.iter().any(|s| s.state_name == name)
    }

    /// Snapshot of active states in insertion order, used for idle-recovery
    /// replay
    pub fn active_states(&self) -> Vec<StateInfo> {
        self.active_states.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaType;

    fn context() -> MediaContext {
        MediaContext::new(
            MediaInfo::new("id1", "Name", "vod", MediaType::Video, 60.0),
            &HashMap::new(),
        )
    }

    #[test]
    fn test_playback_state_precedence() {
        let mut ctx = context();
        assert_eq!(ctx.derived_playback_state(), PlaybackState::Init);

        ctx.enter_playback_state(PlaybackState::Playing);
        assert_eq!(ctx.derived_playback_state(), PlaybackState::Playing);

        ctx.enter_playback_state(PlaybackState::Seeking);
        assert_eq!(ctx.derived_playback_state(), PlaybackState::Seeking);

        ctx.enter_playback_state(PlaybackState::Buffering);
        assert_eq!(ctx.derived_playback_state(), PlaybackState::Buffering);

        ctx.exit_playback_state(PlaybackState::Buffering);
        ctx.exit_playback_state(PlaybackState::Seeking);
        ctx.enter_playback_state(PlaybackState::Paused);
        assert_eq!(ctx.derived_playback_state(), PlaybackState::Paused);
        // Pause replaced Play
        assert!(!ctx.is_in_playback_state(PlaybackState::Playing));
    }

    #[test]
    fn test_state_capacity_and_reuse() {
        let mut ctx = context();
        for i in 0..MAX_ACTIVE_STATES {
            assert!(ctx.start_state(&StateInfo::new(format!("state{i}"))));
        }
        assert!(!ctx.start_state(&StateInfo::new("one_too_many")));

        // Duplicate start also fails
        assert!(!ctx.start_state(&StateInfo::new("state0")));

        // Ending any active state frees a slot
        assert!(ctx.end_state(&StateInfo::new("state3")));
        assert!(ctx.start_state(&StateInfo::new("one_too_many")));
        assert_eq!(ctx.active_states().len(), MAX_ACTIVE_STATES);

        assert!(!ctx.end_state(&StateInfo::new("never_started")));
    }

    #[test]
    fn test_state_snapshot_preserves_insertion_order() {
        let mut ctx = context();
        ctx.start_state(&StateInfo::new("fullscreen"));
        ctx.start_state(&StateInfo::new("mute"));
        ctx.start_state(&StateInfo::new("cc"));
        ctx.end_state(&StateInfo::new("mute"));

        let names: Vec<_> = ctx
            .active_states()
            .into_iter()
            .map(|s| s.state_name)
            .collect();
        assert_eq!(names, vec!["fullscreen", "cc"]);
    }

    #[test]
    fn test_playhead_ignores_invalid_values() {
        let mut ctx = context();
        ctx.set_playhead(10.0);
        ctx.set_playhead(-1.0);
        assert_eq!(ctx.playhead(), 10.0);
        ctx.set_playhead(f64::NAN);
        assert_eq!(ctx.playhead(), 10.0);
    }

    #[test]
    fn test_metadata_sanitized_at_storage() {
        let mut metadata = HashMap::new();
        metadata.insert("good.key".to_string(), "v".to_string());
        metadata.insert("bad key".to_string(), "v".to_string());
        let ctx = MediaContext::new(
            MediaInfo::new("id1", "Name", "vod", MediaType::Video, 60.0),
            &metadata,
        );
        assert_eq!(ctx.metadata().len(), 1);
    }
}
