//! MediaHit - immutable wire-ready analytics record
//!
//! A hit is produced once per accepted semantic event and consumed exactly
//! once by a session. Delivery-time enrichment produces a derived copy for
//! the wire; the original is never mutated.

use crate::types::{EventType, ParamValue, Params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parameter keys understood by the collector
pub mod param_keys {
    pub const MEDIA_ID: &str = "media.id";
    pub const MEDIA_NAME: &str = "media.name";
    pub const MEDIA_LENGTH: &str = "media.length";
    pub const MEDIA_CONTENT_TYPE: &str = "media.contentType";
    pub const MEDIA_TYPE: &str = "media.type";
    pub const MEDIA_RESUMED: &str = "media.resumed";
    pub const MEDIA_DOWNLOADED: &str = "media.downloaded";

    pub const ADBREAK_NAME: &str = "media.adBreak.name";
    pub const ADBREAK_POSITION: &str = "media.adBreak.position";
    pub const ADBREAK_START_TIME: &str = "media.adBreak.startTime";

    pub const AD_ID: &str = "media.ad.id";
    pub const AD_NAME: &str = "media.ad.name";
    pub const AD_POSITION: &str = "media.ad.position";
    pub const AD_LENGTH: &str = "media.ad.length";

    pub const CHAPTER_NAME: &str = "media.chapter.name";
    pub const CHAPTER_POSITION: &str = "media.chapter.position";
    pub const CHAPTER_LENGTH: &str = "media.chapter.length";
    pub const CHAPTER_START_TIME: &str = "media.chapter.startTime";

    pub const STATE_NAME: &str = "media.state.name";

    pub const ERROR_ID: &str = "media.errorId";
    pub const ERROR_SOURCE: &str = "media.errorSource";
    pub const ERROR_SOURCE_PLAYER: &str = "player";

    pub const QOE_BITRATE: &str = "media.qoe.bitrate";
    pub const QOE_DROPPED_FRAMES: &str = "media.qoe.droppedFrames";
    pub const QOE_FPS: &str = "media.qoe.framesPerSecond";
    pub const QOE_STARTUP_TIME: &str = "media.qoe.timeToStart";

    pub const ANALYTICS_REPORT_SUITE: &str = "analytics.reportSuite";
    pub const ANALYTICS_ORG_ID: &str = "analytics.organizationId";
    pub const ANALYTICS_VISITOR_ID: &str = "analytics.visitorId";
    pub const MEDIA_PLAYER_NAME: &str = "media.playerName";
    pub const MEDIA_CHANNEL: &str = "media.channel";
    pub const MEDIA_APP_VERSION: &str = "media.appVersion";
}

/// One analytics record describing a semantic playback event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaHit {
    event_type: EventType,
    playhead: f64,
    ts: i64,
    params: Option<Params>,
    custom_metadata: Option<HashMap<String, String>>,
    qoe_data: Option<Params>,
}

impl MediaHit {
    pub fn new(
        event_type: EventType,
        playhead: f64,
        ts: i64,
        params: Option<Params>,
        custom_metadata: Option<HashMap<String, String>>,
        qoe_data: Option<Params>,
    ) -> Self {
        Self {
            event_type,
            playhead,
            ts,
            params,
            custom_metadata,
            qoe_data,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn playhead(&self) -> f64 {
        self.playhead
    }

    pub fn ts(&self) -> i64 {
        self.ts
    }

    pub fn params(&self) -> Option<&Params> {
        self.params.as_ref()
    }

    pub fn custom_metadata(&self) -> Option<&HashMap<String, String>> {
        self.custom_metadata.as_ref()
    }

    pub fn qoe_data(&self) -> Option<&Params> {
        self.qoe_data.as_ref()
    }

    /// Delivery-time enrichment: a derived copy with `extra` merged into the
    /// params. Existing keys win; the original hit is untouched.
    pub fn with_added_params(&self, extra: Params) -> MediaHit {
        let mut merged = extra;
        if let Some(params) = &self.params {
            for (k, v) in params {
                merged.insert(k.clone(), v.clone());
            }
        }
        MediaHit {
            params: Some(merged),
            ..self.clone()
        }
    }

    /// Serializes to the collector payload shape, identical for a single
    /// real-time hit and for each element of an offline batch array.
    pub fn to_wire(&self) -> WireHit<'_> {
        WireHit {
            player_time: PlayerTime {
                playhead: self.playhead,
                ts: self.ts,
            },
            event_type: self.event_type.as_str(),
            params: self.params.as_ref(),
            custom_metadata: self.custom_metadata.as_ref(),
            qoe_data: self.qoe_data.as_ref(),
        }
    }
}

/// Caller-supplied playback clock for one hit
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlayerTime {
    pub playhead: f64,
    pub ts: i64,
}

/// Wire payload: `{playerTime, eventType, params?, customMetadata?, qoeData?}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireHit<'a> {
    pub player_time: PlayerTime,
    pub event_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Params>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_metadata: Option<&'a HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qoe_data: Option<&'a Params>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping_hit() -> MediaHit {
        MediaHit::new(EventType::Ping, 12.0, 12_000, None, None, None)
    }

    #[test]
    fn test_wire_shape_minimal() {
        let value = serde_json::to_value(ping_hit().to_wire()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "playerTime": { "playhead": 12.0, "ts": 12000 },
                "eventType": "ping",
            })
        );
    }

    #[test]
    fn test_wire_shape_full() {
        let mut params = Params::new();
        params.insert(param_keys::MEDIA_ID.to_string(), ParamValue::from("id1"));
        let mut metadata = HashMap::new();
        metadata.insert("show".to_string(), "s1".to_string());
        let mut qoe = Params::new();
        qoe.insert(
            param_keys::QOE_BITRATE.to_string(),
            ParamValue::Double(1_000_000.0),
        );

        let hit = MediaHit::new(
            EventType::SessionStart,
            0.0,
            0,
            Some(params),
            Some(metadata),
            Some(qoe),
        );
        let value = serde_json::to_value(hit.to_wire()).unwrap();
        assert_eq!(value["eventType"], "sessionStart");
        assert_eq!(value["params"]["media.id"], "id1");
        assert_eq!(value["customMetadata"]["show"], "s1");
        assert_eq!(value["qoeData"]["media.qoe.bitrate"], 1_000_000.0);
    }

    #[test]
    fn test_enrichment_leaves_original_untouched() {
        let mut params = Params::new();
        params.insert("media.id".to_string(), ParamValue::from("id1"));
        let hit = MediaHit::new(EventType::SessionStart, 0.0, 0, Some(params), None, None);

        let mut extra = Params::new();
        extra.insert(
            param_keys::ANALYTICS_REPORT_SUITE.to_string(),
            ParamValue::from("rsid"),
        );
        // Colliding key must not clobber the hit's own value.
        extra.insert("media.id".to_string(), ParamValue::from("other"));

        let enriched = hit.with_added_params(extra);
        assert_eq!(hit.params().unwrap().len(), 1);
        assert_eq!(enriched.params().unwrap().len(), 2);
        assert_eq!(
            enriched.params().unwrap()["media.id"],
            ParamValue::from("id1")
        );
    }
}
