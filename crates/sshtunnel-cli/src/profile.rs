//! Connection profiles
//!
//! Loaded from `~/.ssh-tunnel.yaml` unless another file is given. Each
//! profile names an environment and the hop chain used to reach it.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sshtunnel_client::TunnelOptions;
use sshtunnel_transport::hop::HopDefaults;
use sshtunnel_transport::HopConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// User given to hops when neither the hop nor the file names one
pub const DEFAULT_USER: &str = "root";

/// Default profile file location
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Failed to get home directory")?;
    Ok(home.join(".ssh-tunnel.yaml"))
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Values applied to every hop that leaves them empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

impl ProfileDefaults {
    fn resolve(&self) -> HopDefaults {
        let env = HopDefaults::from_env();
        HopDefaults {
            identity_file: self
                .identity_file
                .as_deref()
                .map(expand_home)
                .unwrap_or(env.identity_file),
            user: self
                .user
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_USER.to_string()),
        }
    }
}

/// One environment: either a single `host` or an ordered list of `hops`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub env_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hops: Vec<HopConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HopConfig>,
}

impl Profile {
    fn chain(&self) -> Result<Vec<HopConfig>> {
        match (&self.host, self.hops.is_empty()) {
            (Some(_), false) => bail!(
                "Profile '{}' sets both 'host' and 'hops'",
                self.env_name
            ),
            (Some(host), true) => Ok(vec![host.clone()]),
            (None, false) => Ok(self.hops.clone()),
            (None, true) => bail!("Profile '{}' has no hosts", self.env_name),
        }
    }
}

/// Profile file contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileFile {
    pub defaults: ProfileDefaults,
    pub options: TunnelOptions,
    pub profiles: Vec<Profile>,
}

/// A profile ready to dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub env_name: String,
    pub hops: Vec<HopConfig>,
    pub options: TunnelOptions,
}

impl ProfileFile {
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&yaml).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn env_names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.env_name.as_str()).collect()
    }

    /// Pick the profile for `env` and fill and check its hops.
    pub fn resolve(&self, env: &str) -> Result<ResolvedProfile> {
        let Some(profile) = self.profiles.iter().find(|p| p.env_name == env) else {
            bail!(
                "no connection profile found. env={:?}, known envs: [{}]",
                env,
                self.env_names().join(", ")
            );
        };

        let defaults = self.defaults.resolve();
        let mut hops = profile.chain()?;
        for (i, hop) in hops.iter_mut().enumerate() {
            if let Some(path) = hop.identity_file.take() {
                hop.identity_file = Some(expand_home(&path));
            }
            hop.set_defaults_from(&defaults);
            hop.validate()
                .with_context(|| format!("Invalid hop {} in profile '{}'", i + 1, env))?;
        }

        debug!(env = %env, hops = hops.len(), "Loaded connection profile");
        Ok(ResolvedProfile {
            env_name: profile.env_name.clone(),
            hops,
            options: self.options.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    const SAMPLE: &str = r#"
defaults:
  user: deploy
  identity_file: /keys/deploy
options:
  keepalive_interval: 5
profiles:
  - env_name: prod
    hops:
      - host_name: bastion.example.com
      - host_name: 10.0.0.5:2222
        user: app
        identity_file: /keys/app
  - env_name: dev
    host:
      hostname: dev.example.com
"#;

    #[test]
    fn test_resolve_multi_hop_profile() {
        let file = ProfileFile::parse(SAMPLE).unwrap();
        let prod = file.resolve("prod").unwrap();

        assert_eq!(prod.hops.len(), 2);
        assert_eq!(prod.hops[0].address(), "bastion.example.com:22");
        assert_eq!(prod.hops[0].user(), "deploy");
        assert_eq!(
            prod.hops[0].identity_file(),
            Some(Path::new("/keys/deploy"))
        );
        assert_eq!(prod.hops[1].address(), "10.0.0.5:2222");
        assert_eq!(prod.hops[1].user(), "app");
        assert_eq!(prod.hops[1].identity_file(), Some(Path::new("/keys/app")));

        assert_eq!(prod.options.keepalive_interval, Duration::from_secs(5));
        assert_eq!(prod.options.reconnect_backoff, Duration::from_secs(3));
    }

    #[test]
    fn test_resolve_single_host_profile() {
        let file = ProfileFile::parse(SAMPLE).unwrap();
        let dev = file.resolve("dev").unwrap();
        assert_eq!(dev.hops.len(), 1);
        assert_eq!(dev.hops[0].address(), "dev.example.com:22");
    }

    #[test]
    fn test_user_falls_back_to_root() {
        let yaml = r#"
profiles:
  - env_name: lab
    host:
      host_name: lab.internal
"#;
        let lab = ProfileFile::parse(yaml).unwrap().resolve("lab").unwrap();
        assert_eq!(lab.hops[0].user(), DEFAULT_USER);
        assert!(lab.hops[0].identity_file().is_some());
    }

    #[test]
    fn test_unknown_env_lists_known_envs() {
        let file = ProfileFile::parse(SAMPLE).unwrap();
        let err = file.resolve("staging").unwrap_err().to_string();
        assert!(err.contains("no connection profile found"), "{err}");
        assert!(err.contains("prod, dev"), "{err}");
    }

    #[test]
    fn test_empty_host_is_rejected() {
        let yaml = r#"
profiles:
  - env_name: broken
    hops:
      - host_name: bastion
      - host_name: ""
"#;
        let err = ProfileFile::parse(yaml).unwrap().resolve("broken").unwrap_err();
        assert!(format!("{err:#}").contains("hop 2"), "{err:#}");
    }

    #[test]
    fn test_profile_needs_exactly_one_host_form() {
        let yaml = r#"
profiles:
  - env_name: none
  - env_name: both
    host:
      host_name: a
    hops:
      - host_name: b
"#;
        let file = ProfileFile::parse(yaml).unwrap();
        assert!(file.resolve("none").is_err());
        assert!(file.resolve("both").is_err());
    }

    #[test]
    fn test_tilde_identity_is_expanded() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let yaml = r#"
profiles:
  - env_name: prod
    host:
      host_name: bastion
      identity_file: ~/.ssh/id_ed25519
"#;
        let prod = ProfileFile::parse(yaml).unwrap().resolve("prod").unwrap();
        assert_eq!(
            prod.hops[0].identity_file(),
            Some(home.join(".ssh/id_ed25519").as_path())
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let loaded = ProfileFile::load(file.path()).unwrap();
        assert_eq!(loaded.env_names(), vec!["prod", "dev"]);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProfileFile::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
