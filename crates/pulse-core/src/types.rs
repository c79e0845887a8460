//! Core types for the Pulse collection pipeline

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Idle timeout: a session that stays out of playback this long is ended
/// and resumed on the next play (milliseconds).
pub const IDLE_TIMEOUT_MS: i64 = 30 * 60 * 1000;

/// Hard session length cap: after this the session is restarted in place
/// (milliseconds).
pub const MAX_SESSION_LENGTH_MS: i64 = 24 * 60 * 60 * 1000;

/// Ping interval for real-time sessions (milliseconds)
pub const PING_INTERVAL_REALTIME_MS: i64 = 10_000;

/// Ping interval for downloaded-content sessions (milliseconds)
pub const PING_INTERVAL_OFFLINE_MS: i64 = 50_000;

/// Ping interval while an ad plays with granular ad tracking (milliseconds)
pub const PING_INTERVAL_GRANULAR_AD_MS: i64 = 1_000;

/// Default preroll wait when the caller does not supply one (milliseconds)
pub const DEFAULT_PREROLL_WAIT_MS: i64 = 250;

/// Maximum number of concurrently active named player states
pub const MAX_ACTIVE_STATES: usize = 10;

/// Maximum delivery retries for session-defining work
pub const MAX_DELIVERY_RETRIES: u32 = 3;

/// Fixed delivery retry backoff (milliseconds)
pub const RETRY_BACKOFF_MS: u64 = 60_000;

/// Heterogeneous parameter value carried on the wire
///
/// Untagged so `{"media.length": 60.0, "media.resumed": false}` round-trips
/// without a type discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Double(v)
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

/// String-keyed parameter map attached to hits
pub type Params = HashMap<String, ParamValue>;

/// Media content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Privacy consent status supplied by the host configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    OptedIn,
    OptedOut,
    Unknown,
}

/// Semantic hit kinds accepted by the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "sessionStart")]
    SessionStart,
    #[serde(rename = "sessionComplete")]
    SessionComplete,
    #[serde(rename = "sessionEnd")]
    SessionEnd,
    #[serde(rename = "play")]
    Play,
    #[serde(rename = "pauseStart")]
    PauseStart,
    #[serde(rename = "bufferStart")]
    BufferStart,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "bitrateChange")]
    BitrateChange,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "adBreakStart")]
    AdBreakStart,
    #[serde(rename = "adBreakComplete")]
    AdBreakComplete,
    #[serde(rename = "adStart")]
    AdStart,
    #[serde(rename = "adComplete")]
    AdComplete,
    #[serde(rename = "adSkip")]
    AdSkip,
    #[serde(rename = "chapterStart")]
    ChapterStart,
    #[serde(rename = "chapterComplete")]
    ChapterComplete,
    #[serde(rename = "chapterSkip")]
    ChapterSkip,
    #[serde(rename = "stateStart")]
    StateStart,
    #[serde(rename = "stateEnd")]
    StateEnd,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStart => "sessionStart",
            EventType::SessionComplete => "sessionComplete",
            EventType::SessionEnd => "sessionEnd",
            EventType::Play => "play",
            EventType::PauseStart => "pauseStart",
            EventType::BufferStart => "bufferStart",
            EventType::Ping => "ping",
            EventType::BitrateChange => "bitrateChange",
            EventType::Error => "error",
            EventType::AdBreakStart => "adBreakStart",
            EventType::AdBreakComplete => "adBreakComplete",
            EventType::AdStart => "adStart",
            EventType::AdComplete => "adComplete",
            EventType::AdSkip => "adSkip",
            EventType::ChapterStart => "chapterStart",
            EventType::ChapterComplete => "chapterComplete",
            EventType::ChapterSkip => "chapterSkip",
            EventType::StateStart => "stateStart",
            EventType::StateEnd => "stateEnd",
        }
    }

    /// Terminal hits close a session on the collector side
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::SessionEnd | EventType::SessionComplete)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Concurrently trackable playback-state flags, plus the derived `Init`
/// reported before any flag is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    Init,
    Buffering,
    Seeking,
    Playing,
    Paused,
}

impl PlaybackState {
    /// The transition hit reported when this becomes the derived state
    pub fn transition_event(&self) -> EventType {
        match self {
            PlaybackState::Buffering => EventType::BufferStart,
            PlaybackState::Seeking | PlaybackState::Paused => EventType::PauseStart,
            PlaybackState::Playing => EventType::Play,
            PlaybackState::Init => EventType::Ping,
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Init => write!(f, "init"),
            PlaybackState::Buffering => write!(f, "buffering"),
            PlaybackState::Seeking => write!(f, "seeking"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

/// Main media descriptor supplied at session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Content identifier
    pub id: String,
    /// Friendly content name
    pub name: String,
    /// Stream type (e.g. "vod", "live")
    pub stream_type: String,
    /// Audio or video
    pub media_type: MediaType,
    /// Content length in seconds (0 for live)
    pub length: f64,
    /// Playback resumes an earlier session
    pub resumed: bool,
    /// Grace period in which preroll ads are expected (milliseconds)
    pub preroll_wait_ms: i64,
    /// Report pings at the granular interval while an ad plays
    pub granular_ad_tracking: bool,
}

impl MediaInfo {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        stream_type: impl Into<String>,
        media_type: MediaType,
        length: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            stream_type: stream_type.into(),
            media_type,
            length,
            resumed: false,
            preroll_wait_ms: DEFAULT_PREROLL_WAIT_MS,
            granular_ad_tracking: false,
        }
    }

    pub fn with_resumed(mut self, resumed: bool) -> Self {
        self.resumed = resumed;
        self
    }

    pub fn with_preroll_wait_ms(mut self, preroll_wait_ms: i64) -> Self {
        self.preroll_wait_ms = preroll_wait_ms;
        self
    }

    pub fn with_granular_ad_tracking(mut self, granular: bool) -> Self {
        self.granular_ad_tracking = granular;
        self
    }

    /// Structural validity; invalid descriptors reject the session start
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && !self.name.is_empty()
            && !self.stream_type.is_empty()
            && self.length.is_finite()
            && self.length >= 0.0
    }
}

/// Ad break (pod) descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdBreakInfo {
    /// Friendly break name
    pub name: String,
    /// 1-based position of the break within the content
    pub position: i64,
    /// Content playhead at which the break starts, in seconds
    pub start_time: f64,
}

impl AdBreakInfo {
    pub fn new(name: impl Into<String>, position: i64, start_time: f64) -> Self {
        Self {
            name: name.into(),
            position,
            start_time,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
            && self.position >= 1
            && self.start_time.is_finite()
            && self.start_time >= 0.0
    }
}

/// Ad descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdInfo {
    /// Ad identifier
    pub id: String,
    /// Friendly ad name
    pub name: String,
    /// 1-based position of the ad within its break
    pub position: i64,
    /// Ad length in seconds
    pub length: f64,
}

impl AdInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, position: i64, length: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            position,
            length,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && !self.name.is_empty()
            && self.position >= 1
            && self.length.is_finite()
            && self.length > 0.0
    }
}

/// Chapter descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterInfo {
    /// Friendly chapter name
    pub name: String,
    /// 1-based chapter position
    pub position: i64,
    /// Chapter length in seconds
    pub length: f64,
    /// Content playhead at which the chapter starts, in seconds
    pub start_time: f64,
}

impl ChapterInfo {
    pub fn new(name: impl Into<String>, position: i64, length: f64, start_time: f64) -> Self {
        Self {
            name: name.into(),
            position,
            length,
            start_time,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
            && self.position >= 1
            && self.length.is_finite()
            && self.length > 0.0
            && self.start_time.is_finite()
            && self.start_time >= 0.0
    }
}

/// Named player state descriptor (e.g. "fullscreen", "mute")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateInfo {
    pub state_name: String,
}

impl StateInfo {
    pub fn new(state_name: impl Into<String>) -> Self {
        Self {
            state_name: state_name.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state_name.len() <= 64 && is_valid_identifier(&self.state_name)
    }
}

/// Quality-of-experience sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QoeInfo {
    /// Current bitrate in bits per second
    pub bitrate: f64,
    /// Dropped frame count
    pub dropped_frames: f64,
    /// Frames per second
    pub fps: f64,
    /// Time to first frame, in seconds
    pub startup_time: f64,
}

impl QoeInfo {
    pub fn new(bitrate: f64, dropped_frames: f64, fps: f64, startup_time: f64) -> Self {
        Self {
            bitrate,
            dropped_frames,
            fps,
            startup_time,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.bitrate, self.dropped_frames, self.fps, self.startup_time]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

/// Per-tracker configuration fixed at construction
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Downloaded content: persist hits and report one batch at session end
    pub downloaded_content: bool,
}

/// Read-mostly configuration and identity shared by every session.
///
/// Every field is required before delivery; the pump idles until the host
/// supplies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedAnalyticsState {
    pub privacy: PrivacyStatus,
    /// Collector host, e.g. "collector.example.com"
    pub collection_host: String,
    pub report_suite: String,
    pub org_id: String,
    pub visitor_id: String,
    pub player_name: String,
    pub channel: String,
    pub app_version: String,
}

impl SharedAnalyticsState {
    /// True when every tracking parameter needed on the wire is present
    pub fn is_ready(&self) -> bool {
        !self.collection_host.is_empty()
            && !self.report_suite.is_empty()
            && !self.org_id.is_empty()
            && !self.visitor_id.is_empty()
            && !self.player_name.is_empty()
            && !self.channel.is_empty()
            && !self.app_version.is_empty()
    }
}

impl Default for SharedAnalyticsState {
    fn default() -> Self {
        Self {
            privacy: PrivacyStatus::Unknown,
            collection_host: String::new(),
            report_suite: String::new(),
            org_id: String::new(),
            visitor_id: String::new(),
            player_name: String::new(),
            channel: String::new(),
            app_version: String::new(),
        }
    }
}

/// Metadata keys are restricted identifiers: letters, digits, `_` and `.`
pub fn is_valid_identifier(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Drops non-conforming metadata keys at storage time (logged, never an error)
pub fn sanitize_metadata(metadata: &HashMap<String, String>) -> HashMap<String, String> {
    let mut clean = HashMap::with_capacity(metadata.len());
    for (key, value) in metadata {
        if is_valid_identifier(key) {
            clean.insert(key.clone(), value.clone());
        } else {
            tracing::debug!(key = %key, "Dropping metadata key with invalid characters");
        }
    }
    clean
}
