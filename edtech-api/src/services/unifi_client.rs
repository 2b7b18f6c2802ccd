//! UniFi controller client used by the device poller
//!
//! Classic controller API: cookie login via `POST /api/login`, station
//! snapshot via `GET /api/s/{site}/stat/sta`. Sessions expire server-side;
//! on a 401 the client logs in again and retries the snapshot once.
//!
//! Controllers ship self-signed certificates, so certificate verification
//! is disabled for this client only.

use crate::models::RawDevice;
use edtech_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error as ThisError;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from one snapshot attempt; the poller counts these per tick
#[derive(Debug, ThisError)]
pub enum UniFiError {
    #[error("Controller request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Controller login rejected")]
    LoginRejected,

    #[error("Controller returned {0}")]
    Status(reqwest::StatusCode),
}

pub struct UniFiClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    site: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct StationListResponse {
    #[serde(default)]
    data: Vec<Station>,
}

/// Station record as the controller reports it; only the fields the
/// pipeline needs are parsed
#[derive(Debug, Deserialize)]
struct Station {
    mac: String,
    #[serde(default)]
    essid: Option<String>,
    #[serde(default)]
    signal: Option<i32>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl UniFiClient {
    pub fn new(base_url: &str, username: &str, password: &str, site: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .cookie_store(true)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Config(format!("Cannot build controller HTTP client: {}", e)))?;
        Ok(UniFiClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            site: site.to_string(),
        })
    }

    /// Fetch the current wireless station snapshot
    pub async fn fetch_devices(&self) -> std::result::Result<Vec<RawDevice>, UniFiError> {
        match self.snapshot().await {
            Err(UniFiError::Status(status)) if status == reqwest::StatusCode::UNAUTHORIZED => {
                self.login().await?;
                self.snapshot().await
            }
            other => other,
        }
    }

    async fn login(&self) -> std::result::Result<(), UniFiError> {
        let url = format!("{}/api/login", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(UniFiError::LoginRejected)
        }
    }

    async fn snapshot(&self) -> std::result::Result<Vec<RawDevice>, UniFiError> {
        let url = format!("{}/api/s/{}/stat/sta", self.base_url, self.site);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UniFiError::Status(status));
        }
        let body: StationListResponse = response.json().await?;
        Ok(to_raw_devices(body.data))
    }
}

/// Map controller stations to pipeline input.
///
/// Wired stations carry no SSID and are skipped; stations without a
/// signal reading are skipped too rather than guessed at.
fn to_raw_devices(stations: Vec<Station>) -> Vec<RawDevice> {
    let total = stations.len();
    let devices: Vec<RawDevice> = stations
        .into_iter()
        .filter_map(|station| {
            let ssid = station.essid.filter(|s| !s.trim().is_empty())?;
            let signal = station.signal?;
            Some(RawDevice {
                mac: station.mac,
                ssid,
                signal,
                hostname: station.hostname.or(station.name),
            })
        })
        .collect();
    if devices.len() < total {
        debug!(
            skipped = total - devices.len(),
            kept = devices.len(),
            "Skipped stations without SSID or signal"
        );
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_list_parse_and_mapping() {
        let body = r#"{
            "meta": {"rc": "ok"},
            "data": [
                {"mac": "aa:bb:cc:dd:ee:01", "essid": "lab-101", "signal": -48, "hostname": "cart-7"},
                {"mac": "aa:bb:cc:dd:ee:02", "essid": "lab-101", "signal": -61, "name": "spare"},
                {"mac": "aa:bb:cc:dd:ee:03", "signal": -50},
                {"mac": "aa:bb:cc:dd:ee:04", "essid": "guest-wifi"}
            ]
        }"#;
        let parsed: StationListResponse = serde_json::from_str(body).unwrap();
        let devices = to_raw_devices(parsed.data);

        // Wired (no essid) and signal-less stations are dropped
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].ssid, "lab-101");
        assert_eq!(devices[0].hostname.as_deref(), Some("cart-7"));
        // `name` is the fallback hostname field
        assert_eq!(devices[1].hostname.as_deref(), Some("spare"));
    }

    #[test]
    fn test_empty_data_tolerated() {
        let parsed: StationListResponse = serde_json::from_str(r#"{"meta":{}}"#).unwrap();
        assert!(to_raw_devices(parsed.data).is_empty());
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let client = UniFiClient::new("https://unifi:8443/", "ro", "pw", "default").unwrap();
        assert_eq!(client.base_url, "https://unifi:8443");
        assert_eq!(client.site, "default");
    }
}
