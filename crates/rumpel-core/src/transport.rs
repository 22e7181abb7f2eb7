//! HTTP upload transport.
//!
//! Enabled with the `http` feature. Batches are POSTed as a JSON array of
//! camelCase sample objects with the auth token in a configurable header.
//!
//! ```json
//! [
//!   {
//!     "sequenceId": 41,
//!     "latitude": 51.5,
//!     "longitude": -0.1,
//!     "horizontalAccuracyMeters": 12.0,
//!     "capturedAt": "2024-05-01T12:00:00Z"
//!   }
//! ]
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use time::OffsetDateTime;

use rumpel_types::LocationSample;

use crate::error::NetworkError;
use crate::traits::UploadTransport;

/// Header carrying the auth token unless configured otherwise.
pub const DEFAULT_AUTH_HEADER: &str = "x-auth-token";

/// Per-request timeout. The wake budget usually cuts in first.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Wire form of one uploaded sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSample {
    pub sequence_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub horizontal_accuracy_meters: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
}

impl From<&LocationSample> for WireSample {
    fn from(sample: &LocationSample) -> Self {
        Self {
            sequence_id: sample.sequence_id,
            latitude: sample.latitude,
            longitude: sample.longitude,
            horizontal_accuracy_meters: sample.horizontal_accuracy,
            captured_at: sample.captured_at,
        }
    }
}

/// Uploads batches with reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    auth_header: String,
}

impl HttpTransport {
    /// Create a transport sending the token in `auth_header`.
    pub fn new(auth_header: impl Into<String>) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("rumpel-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NetworkError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, auth_header))
    }

    /// Create a transport with a custom reqwest Client.
    pub fn with_client(client: Client, auth_header: impl Into<String>) -> Self {
        Self {
            client,
            auth_header: auth_header.into(),
        }
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload(
        &self,
        endpoint: &str,
        batch: &[LocationSample],
        auth_token: &str,
    ) -> Result<u16, NetworkError> {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(NetworkError::InvalidEndpoint(endpoint.to_string()));
        }

        let body: Vec<WireSample> = batch.iter().map(WireSample::from).collect();
        let response = self
            .client
            .post(endpoint)
            .header(self.auth_header.as_str(), auth_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NetworkError::Timeout(REQUEST_TIMEOUT)
                } else {
                    NetworkError::Transport(e.to_string())
                }
            })?;

        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumpel_types::RawFix;

    #[test]
    fn test_wire_sample_json() {
        let captured_at = OffsetDateTime::from_unix_timestamp(1_714_564_800).unwrap();
        let mut sample = LocationSample::from_fix(&RawFix::new(51.5, -0.1, 12.0, captured_at));
        sample.sequence_id = 41;

        let json = serde_json::to_value(WireSample::from(&sample)).unwrap();
        assert_eq!(json["sequenceId"], 41);
        assert_eq!(json["horizontalAccuracyMeters"], 12.0);
        assert_eq!(json["capturedAt"], "2024-05-01T12:00:00Z");
        assert!(json.get("syncedAt").is_none());
    }

    #[tokio::test]
    async fn test_rejects_non_http_endpoint() {
        let transport = HttpTransport::new(DEFAULT_AUTH_HEADER).unwrap();
        let result = transport.upload("ftp://hat.example", &[], "tok").await;
        assert!(matches!(result, Err(NetworkError::InvalidEndpoint(_))));
    }
}
