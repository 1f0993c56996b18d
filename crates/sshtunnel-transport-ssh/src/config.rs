//! SSH client configuration

use russh::client;
use std::sync::Arc;
use std::time::Duration;

/// Client-side tuning for every session the dialer opens
#[derive(Debug, Clone)]
pub struct SshClientOptions {
    /// Disable Nagle on the first hop's socket
    pub nodelay: bool,

    /// Give up on a handshake that takes longer than this
    pub connect_timeout: Duration,

    /// Give up on a channel open or forward request the server has not
    /// answered within this long
    pub request_timeout: Duration,

    /// Library keepalive cadence while the server is silent. `None` disables
    /// it, leaving a half-open session undetected until TCP gives up.
    pub keepalive_interval: Option<Duration>,

    /// Unanswered library keepalives after which the session is ended
    pub keepalive_max: usize,

    /// Drop the session after this much silence
    pub inactivity_timeout: Option<Duration>,
}

impl Default for SshClientOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            connect_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(15),
            keepalive_interval: Some(Duration::from_secs(15)),
            keepalive_max: 3,
            inactivity_timeout: None,
        }
    }
}

impl SshClientOptions {
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, interval: Option<Duration>, max: usize) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_max = max;
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    /// russh configuration. The library counts keepalives the server leaves
    /// unanswered and ends the session after `keepalive_max` of them, which
    /// fails the tunnel supervisor's next keepalive check.
    pub(crate) fn russh_config(&self) -> Arc<client::Config> {
        Arc::new(client::Config {
            inactivity_timeout: self.inactivity_timeout,
            keepalive_interval: self.keepalive_interval,
            keepalive_max: self.keepalive_max,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_detect_silent_peer() {
        let options = SshClientOptions::default();
        assert!(options.nodelay);
        assert_eq!(options.request_timeout, Duration::from_secs(15));

        let config = options.russh_config();
        assert_eq!(config.keepalive_interval, Some(Duration::from_secs(15)));
        assert_eq!(config.keepalive_max, 3);
        assert!(config.inactivity_timeout.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let options = SshClientOptions::default()
            .with_nodelay(false)
            .with_connect_timeout(Duration::from_secs(3))
            .with_request_timeout(Duration::from_secs(5))
            .with_keepalive(None, 0)
            .with_inactivity_timeout(Duration::from_secs(60));

        assert!(!options.nodelay);
        assert_eq!(options.connect_timeout, Duration::from_secs(3));
        assert_eq!(options.request_timeout, Duration::from_secs(5));

        let config = options.russh_config();
        assert!(config.keepalive_interval.is_none());
        assert_eq!(config.keepalive_max, 0);
        assert_eq!(config.inactivity_timeout, Some(Duration::from_secs(60)));
    }
}
