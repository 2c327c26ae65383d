use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A STUN or TURN relay handed to the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: username.into(),
            credential: credential.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}

/// Peer connection settings. Unified-plan SDP and required RTCP muxing are
/// not configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServer>,
    #[serde(default)]
    pub ice_transport_policy: IceTransportPolicy,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer::stun("stun:freestun.net:3479"),
                IceServer::stun("stun:freestun.net:5350"),
                IceServer::turn("turn:freestun.net:3479", "free", "free"),
                IceServer::turn("turns:freestun.net:5350", "free", "free"),
            ],
            ice_transport_policy: IceTransportPolicy::All,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket endpoint of the gateway, e.g. `ws://localhost:8188`.
    pub url: String,
    pub keepalive_interval: Duration,
    pub stats_interval: Duration,
    /// How long a request waits for its correlated `success`/`error`.
    pub request_timeout: Duration,
    pub rtc: RtcConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8188".to_string(),
            keepalive_interval: Duration::from_secs(25),
            stats_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            rtc: RtcConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_relays() {
        let rtc = RtcConfig::default();
        assert_eq!(rtc.ice_servers.len(), 4);
        assert_eq!(rtc.ice_transport_policy, IceTransportPolicy::All);

        let turn: Vec<_> = rtc
            .ice_servers
            .iter()
            .filter(|s| !s.username.is_empty())
            .collect();
        assert_eq!(turn.len(), 2);
        assert!(turn.iter().all(|s| s.credential == "free"));
    }

    #[test]
    fn test_default_timings() {
        let config = ClientConfig::with_url("wss://janus.example.org/ws");
        assert_eq!(config.url, "wss://janus.example.org/ws");
        assert_eq!(config.keepalive_interval, Duration::from_secs(25));
        assert_eq!(config.stats_interval, Duration::from_secs(1));
    }
}
