//! Client configuration.
//!
//! Every field has a default, so a YAML file only needs the keys it changes:
//!
//! ```yaml
//! bind_address: "0.0.0.0:56700"
//! discovery_interval: 10000   # milliseconds
//! query_group_on_discovery: false
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::protocol::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Local endpoint the client socket binds to.
    pub bind_address: SocketAddr,
    /// Where discovery requests are sent.
    pub broadcast_address: IpAddr,
    /// Device port used for discovery requests and for devices added with `connect`.
    pub port: u16,
    /// Source identifier stamped on every request. Random when absent.
    pub source: Option<u32>,
    #[serde(with = "duration_millis")]
    pub discovery_interval: Duration,
    /// How long an exchange may stay pending.
    #[serde(with = "duration_millis")]
    pub response_timeout: Duration,
    /// How often expired exchanges are evicted.
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,
    /// Minimum gap devices expect between messages. Callers throttle, the client does not.
    #[serde(with = "duration_millis")]
    pub min_message_interval: Duration,
    /// Consecutive receive errors tolerated before the receive loop gives up.
    pub max_receive_restarts: u32,
    #[serde(with = "duration_millis")]
    pub receive_restart_backoff: Duration,
    /// Ask every newly discovered device for its group.
    pub query_group_on_discovery: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
            port: DEFAULT_PORT,
            source: None,
            discovery_interval: Duration::from_secs(30),
            response_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            min_message_interval: Duration::from_millis(50),
            max_receive_restarts: 5,
            receive_restart_backoff: Duration::from_millis(200),
            query_group_on_discovery: true,
        }
    }
}

impl ClientConfig {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse client configuration")
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    /// A configuration bound to an ephemeral loopback port. Useful for tests.
    pub fn loopback() -> Self {
        ClientConfig {
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            broadcast_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            query_group_on_discovery: false,
            ..ClientConfig::default()
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
