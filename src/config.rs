// Call configuration.
// Logging can only be switched off in development builds.

use crate::error::{CallError, Result};
use crate::peer::types::ParticipantId;
use crate::utils::add_ice_url_scheme;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // debug builds log

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // release builds stay quiet

#[cfg(debug_assertions)]
pub mod dev {
    // Set to false to silence a debug build entirely.
    // Only honoured in debug builds.
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

/// Interval between two emotion samples.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 3_000;

const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// ICE server entry, as entered in the server list form
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // "stun" or "turn"
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: &str, url: &str) -> Self {
        Self {
            id: id.into(),
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }
}

/// Everything one participant needs to join a room
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CallConfig {
    pub room_id: String,
    #[serde(default = "ParticipantId::random")]
    pub user_id: ParticipantId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub ice_servers: Vec<ServerConfig>,
    #[serde(default)]
    pub signaling_url: Option<String>,
    #[serde(default)]
    pub report_url: Option<String>,
    /// Sessions parked in `OfferSent` longer than this are dropped. Off when `None`.
    #[serde(default)]
    pub negotiation_timeout_secs: Option<u64>,
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,
}

fn default_sample_interval() -> u64 {
    DEFAULT_SAMPLE_INTERVAL_MS
}

impl CallConfig {
    pub fn new(room_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: ParticipantId::random(),
            display_name: display_name.into(),
            is_host: false,
            ice_servers: Vec::new(),
            signaling_url: None,
            report_url: None,
            negotiation_timeout_secs: None,
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: CallConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Rejects empty room ids, empty server URLs and TURN entries without credentials.
    pub fn validate(&self) -> Result<()> {
        if self.room_id.trim().is_empty() {
            return Err(CallError::InvalidConfig("room_id cannot be empty".into()));
        }
        if self.sample_interval_ms == 0 {
            return Err(CallError::InvalidConfig(
                "sample_interval_ms must be positive".into(),
            ));
        }
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(CallError::InvalidConfig(format!(
                    "ICE server {} has an empty url",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(CallError::InvalidConfig(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn negotiation_timeout(&self) -> Option<Duration> {
        self.negotiation_timeout_secs.map(Duration::from_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Configured servers, or the public STUN pair when none are set.
    pub fn effective_ice_servers(&self) -> Vec<ServerConfig> {
        if self.ice_servers.is_empty() {
            DEFAULT_STUN_SERVERS
                .iter()
                .enumerate()
                .map(|(i, url)| ServerConfig::stun(&format!("default-stun-{i}"), url))
                .collect()
        } else {
            self.ice_servers.clone()
        }
    }

    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.effective_ice_servers()
            .into_iter()
            .map(|config| {
                let url = add_ice_url_scheme(&config);
                RTCIceServer {
                    urls: vec![url],
                    username: config.username.unwrap_or_default(),
                    credential: config.credential.unwrap_or_default(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_json_with_defaults() {
        let config = CallConfig::from_json_str(r#"{"room_id":"abc123"}"#).unwrap();
        assert_eq!(config.room_id, "abc123");
        assert_eq!(config.user_id.as_str().len(), 16);
        assert_eq!(config.sample_interval_ms, DEFAULT_SAMPLE_INTERVAL_MS);
        assert!(config.negotiation_timeout().is_none());
        assert!(!config.is_host);
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let raw = r#"{
            "room_id": "r",
            "ice_servers": [{"id": "t", "type": "turn", "url": "turn.example.org:3478",
                             "username": "u", "credential": null}]
        }"#;
        let err = CallConfig::from_json_str(raw).unwrap_err();
        assert!(matches!(err, CallError::InvalidConfig(_)));
    }

    #[test]
    fn empty_room_is_rejected() {
        let err = CallConfig::from_json_str(r#"{"room_id":"  "}"#).unwrap_err();
        assert!(matches!(err, CallError::InvalidConfig(_)));
    }

    #[test]
    fn defaults_to_public_stun_pair() {
        let config = CallConfig::new("room", "Ann");
        let servers = config.rtc_ice_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302".to_string()]);
    }

    #[test]
    fn turn_entry_gets_scheme_and_credentials() {
        let mut config = CallConfig::new("room", "Ann");
        config.ice_servers = vec![ServerConfig {
            id: "t".into(),
            r#type: "turn".into(),
            url: "relay.example.org:3478".into(),
            username: Some("user".into()),
            credential: Some("secret".into()),
        }];
        config.validate().unwrap();
        let servers = config.rtc_ice_servers();
        assert_eq!(servers[0].urls, vec!["turn:relay.example.org:3478".to_string()]);
        assert_eq!(servers[0].username, "user");
        assert_eq!(servers[0].credential, "secret");
    }
}
