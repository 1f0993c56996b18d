//! Tunnel timing options

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs for the supervisor and the engines. Every field has a
/// default, so an empty YAML/JSON object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelOptions {
    /// Keepalive probe cadence
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// Wait between failed redials
    #[serde(with = "duration_secs")]
    pub reconnect_backoff: Duration,

    /// Minimum wait between failed listen or rebind attempts
    #[serde(with = "duration_secs")]
    pub relisten_interval: Duration,

    /// How long an accepted forward connection may wait for a transport
    #[serde(with = "duration_secs")]
    pub transport_wait: Duration,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(15),
            reconnect_backoff: Duration::from_secs(3),
            relisten_interval: Duration::from_secs(1),
            transport_wait: Duration::from_secs(30),
        }
    }
}

impl TunnelOptions {
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_relisten_interval(mut self, interval: Duration) -> Self {
        self.relisten_interval = interval;
        self
    }

    pub fn with_transport_wait(mut self, wait: Duration) -> Self {
        self.transport_wait = wait;
        self
    }
}

/// Helper module for serializing Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
