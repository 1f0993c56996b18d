//! Hop configuration: one authentication target in a dial chain

use crate::addr::{has_port, join_host_port};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Port used when a host name carries none
pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HopConfigError {
    #[error("SSH host name required")]
    MissingHost,
}

/// One hop: where to connect, as whom, with which key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HopConfig {
    /// `host` or `host:port`
    #[serde(alias = "hostname")]
    pub host_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Path to the private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

/// Values used to fill the fields a [`HopConfig`] leaves empty
#[derive(Debug, Clone)]
pub struct HopDefaults {
    pub identity_file: PathBuf,
    pub user: String,
}

impl HopDefaults {
    /// `$HOME/.ssh/id_rsa` and `$USER` of the invoking process
    pub fn from_env() -> Self {
        let identity_file = dirs::home_dir()
            .unwrap_or_default()
            .join(".ssh")
            .join("id_rsa");
        let user = std::env::var("USER")
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "root".to_string());
        Self { identity_file, user }
    }
}

impl HopConfig {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            user: None,
            identity_file: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Fill missing fields from the environment. See [`Self::set_defaults_from`].
    pub fn set_defaults(&mut self) {
        self.set_defaults_from(&HopDefaults::from_env());
    }

    /// Fill missing fields. Fields that are already set are never touched,
    /// so applying this twice changes nothing the second time.
    pub fn set_defaults_from(&mut self, defaults: &HopDefaults) {
        if self
            .identity_file
            .as_ref()
            .map_or(true, |p| p.as_os_str().is_empty())
        {
            self.identity_file = Some(defaults.identity_file.clone());
        }
        if !self.host_name.is_empty() && !has_port(&self.host_name) {
            self.host_name = join_host_port(&self.host_name, DEFAULT_SSH_PORT);
        }
        if self.user.as_deref().map_or(true, str::is_empty) {
            self.user = Some(defaults.user.clone());
        }
    }

    pub fn validate(&self) -> Result<(), HopConfigError> {
        let host = self.host_name.trim();
        if host.is_empty() || host.starts_with(':') {
            return Err(HopConfigError::MissingHost);
        }
        Ok(())
    }

    /// `host:port` to dial
    pub fn address(&self) -> &str {
        &self.host_name
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or_default()
    }

    pub fn identity_file(&self) -> Option<&Path> {
        self.identity_file.as_deref()
    }
}
