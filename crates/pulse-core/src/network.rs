//! HTTP transport seam for collector delivery
//!
//! Sessions talk to the network through the [`Network`] trait so delivery
//! logic stays testable without sockets. The production implementation wraps
//! a shared `reqwest` client and folds transport failures into the
//! recoverable side of the error taxonomy.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Statuses worth retrying; everything else 4xx/5xx is final
const RECOVERABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

pub fn is_recoverable_status(status: u16) -> bool {
    RECOVERABLE_STATUSES.contains(&status)
}

/// Session create endpoint; also takes the full batch in offline mode.
/// Rejects hosts that do not form a valid URL.
pub fn sessions_url(collection_host: &str) -> Result<String> {
    let url = Url::parse(&format!("https://{collection_host}/api/v1/sessions"))?;
    Ok(url.to_string())
}

/// Per-event endpoint for an established collector session
pub fn session_events_url(collection_host: &str, collector_session_id: &str) -> Result<String> {
    let url = Url::parse(&format!(
        "https://{collection_host}/api/v1/sessions/{collector_session_id}/events"
    ))?;
    Ok(url.to_string())
}

/// One outbound POST to the collector
#[derive(Debug, Clone)]
pub struct HitRequest {
    pub url: String,
    pub body: serde_json::Value,
}

/// What delivery logic needs back: status plus the Location header that
/// carries the collector session path on session create.
#[derive(Debug, Clone)]
pub struct HitResponse {
    pub status: u16,
    pub location: Option<String>,
}

impl HitResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn post(&self, request: HitRequest) -> Result<HitResponse>;
}

/// Production transport over a shared reqwest client
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn post(&self, request: HitRequest) -> Result<HitResponse> {
        let response = self
            .client
            .post(&request.url)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::RequestTimeout
                } else if e.is_connect() {
                    Error::DeviceOffline
                } else {
                    Error::Network(e)
                }
            })?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        debug!(status, has_location = location.is_some(), "Collector response");
        Ok(HitResponse { status, location })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(is_recoverable_status(status));
        }
        for status in [200, 201, 400, 401, 403, 404, 501] {
            assert!(!is_recoverable_status(status));
        }
    }

    #[test]
    fn test_endpoint_urls_require_a_valid_host() {
        assert_eq!(
            sessions_url("collector.example.com").unwrap(),
            "https://collector.example.com/api/v1/sessions"
        );
        assert_eq!(
            session_events_url("collector.example.com", "abc123").unwrap(),
            "https://collector.example.com/api/v1/sessions/abc123/events"
        );
        assert!(matches!(
            sessions_url("not a host"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_response_success_range() {
        assert!(HitResponse {
            status: 201,
            location: None
        }
        .is_success());
        assert!(!HitResponse {
            status: 404,
            location: None
        }
        .is_success());
    }
}
