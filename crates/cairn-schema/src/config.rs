use crate::types::{ClusterName, HostName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default file name of the deployment config in the working directory.
pub const CONFIG_FILE_NAME: &str = "cairn.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeToml(#[from] toml::ser::Error),
    #[error("unsupported config_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("invalid cluster name '{0}': must match [a-zA-Z0-9_-] and be 1-64 characters")]
    InvalidClusterName(String),
    #[error("cluster.mon_initial_members must not be empty")]
    NoInitialMembers,
    #[error("monitor '{0}' is listed more than once in cluster.mon_initial_members")]
    DuplicateMember(String),
    #[error("quorum.backoff_secs must not be empty")]
    EmptyBackoff,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub config_version: u32,
    pub cluster: ClusterSection,
    #[serde(default)]
    pub ssh: SshSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub quorum: QuorumSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClusterSection {
    #[serde(default = "default_cluster_name")]
    pub name: ClusterName,
    pub mon_initial_members: Vec<HostName>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SshSection {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Extra `-o Key=Value` options handed to ssh.
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSection {
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            command_secs: default_command_secs(),
            idle_secs: default_idle_secs(),
            connect_secs: default_connect_secs(),
        }
    }
}

impl TimeoutSection {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct QuorumSection {
    /// Sleep schedule between status polls, consumed from the end.
    #[serde(default = "default_backoff")]
    pub backoff_secs: Vec<u64>,
}

impl Default for QuorumSection {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff(),
        }
    }
}

fn default_cluster_name() -> ClusterName {
    ClusterName::new("ceph")
}

fn default_command_secs() -> u64 {
    300
}

fn default_idle_secs() -> u64 {
    300
}

fn default_connect_secs() -> u64 {
    25
}

pub fn default_backoff() -> Vec<u64> {
    vec![20, 20, 15, 10, 10, 5]
}

pub fn validate_cluster_name(name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidClusterName(name.to_owned()))
    }
}

impl ClusterConfig {
    /// A minimal config for the given cluster and monitors, with defaults elsewhere.
    pub fn new(cluster: &str, members: &[&str]) -> Self {
        Self {
            config_version: 1,
            cluster: ClusterSection {
                name: ClusterName::new(cluster),
                mon_initial_members: members.iter().map(|m| HostName::new(*m)).collect(),
            },
            ssh: SshSection::default(),
            timeouts: TimeoutSection::default(),
            quorum: QuorumSection::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config_version != 1 {
            return Err(ConfigError::UnsupportedVersion(self.config_version));
        }
        validate_cluster_name(&self.cluster.name)?;
        if self.cluster.mon_initial_members.is_empty() {
            return Err(ConfigError::NoInitialMembers);
        }
        let mut seen = BTreeSet::new();
        for member in &self.cluster.mon_initial_members {
            if !seen.insert(member.as_str()) {
                return Err(ConfigError::DuplicateMember(member.to_string()));
            }
        }
        if self.quorum.backoff_secs.is_empty() {
            return Err(ConfigError::EmptyBackoff);
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

pub fn parse_config_str(input: &str) -> Result<ClusterConfig, ConfigError> {
    let config: ClusterConfig = toml::from_str(input)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<ClusterConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}
