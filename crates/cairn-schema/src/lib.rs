//! Data model for Cairn deployments.
//!
//! This crate defines the schema layer: the `cairn.toml` deployment config
//! (`ClusterConfig`), the text keyring format (`Keyring`) with its tolerant key
//! comparison, the monitor status document (`MonStatus`) and its
//! classification, and the identity kinds harvested from a monitor (`KeyKind`).

pub mod config;
pub mod keyring;
pub mod status;
pub mod types;

pub use config::{
    default_backoff, parse_config_file, parse_config_str, validate_cluster_name, ClusterConfig,
    ClusterSection, ConfigError, QuorumSection, SshSection, TimeoutSection, CONFIG_FILE_NAME,
};
pub use keyring::{
    extract_key, key_fingerprint, keys_equivalent, parse_keyring_str, Keyring, KeyringEntity,
    KeyringError,
};
pub use status::{MonMap, MonMapEntry, MonStatus, MonitorStatus, StatusError, QUORUM_STATES};
pub use types::{ClusterName, EntityName, HostName, KeyKind};
