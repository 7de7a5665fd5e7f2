//! Newtype wrappers for the string identifiers that flow through a deployment,
//! plus the closed set of keyring identities harvested from a monitor.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Hostname as supplied by the operator (config or command line).
    HostName
);

string_newtype!(
    /// Cluster name, used as the prefix of every local and remote artifact.
    ClusterName
);

string_newtype!(
    /// Keyring principal such as `client.admin` or `mon.`.
    EntityName
);

impl HostName {
    /// The short form of the hostname (everything before the first dot).
    pub fn short(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }
}

/// Identity kinds harvested from a monitor, one local keyring file each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyKind {
    Mon,
    Admin,
    BootstrapOsd,
    BootstrapMds,
    BootstrapRgw,
}

impl KeyKind {
    /// Every kind, in the order harvesting and reconciliation process them.
    pub const ALL: [KeyKind; 5] = [
        KeyKind::Mon,
        KeyKind::Admin,
        KeyKind::BootstrapOsd,
        KeyKind::BootstrapMds,
        KeyKind::BootstrapRgw,
    ];

    pub fn entity(self) -> EntityName {
        EntityName::new(match self {
            KeyKind::Mon => "mon.",
            KeyKind::Admin => "client.admin",
            KeyKind::BootstrapOsd => "client.bootstrap-osd",
            KeyKind::BootstrapMds => "client.bootstrap-mds",
            KeyKind::BootstrapRgw => "client.bootstrap-rgw",
        })
    }

    /// Local keyring file name for this identity in the given cluster.
    pub fn file_name(self, cluster: &ClusterName) -> String {
        match self {
            KeyKind::Mon => format!("{cluster}.mon.keyring"),
            KeyKind::Admin => format!("{cluster}.client.admin.keyring"),
            KeyKind::BootstrapOsd => format!("{cluster}.bootstrap-osd.keyring"),
            KeyKind::BootstrapMds => format!("{cluster}.bootstrap-mds.keyring"),
            KeyKind::BootstrapRgw => format!("{cluster}.bootstrap-rgw.keyring"),
        }
    }

    /// Capabilities requested when the identity has to be created.
    /// The monitor identity is never created, only read.
    pub fn caps(self) -> &'static [(&'static str, &'static str)] {
        match self {
            KeyKind::Mon => &[],
            KeyKind::Admin => &[("osd", "allow *"), ("mon", "allow *"), ("mds", "allow *")],
            KeyKind::BootstrapOsd => &[("mon", "allow profile bootstrap-osd")],
            KeyKind::BootstrapMds => &[("mon", "allow profile bootstrap-mds")],
            KeyKind::BootstrapRgw => &[("mon", "allow profile bootstrap-rgw")],
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Mon => write!(f, "mon"),
            KeyKind::Admin => write!(f, "admin"),
            KeyKind::BootstrapOsd => write!(f, "bootstrap-osd"),
            KeyKind::BootstrapMds => write!(f, "bootstrap-mds"),
            KeyKind::BootstrapRgw => write!(f, "bootstrap-rgw"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_name_display_and_as_ref() {
        let host = HostName::new("mon1");
        assert_eq!(host.to_string(), "mon1");
        assert_eq!(host.as_str(), "mon1");
        assert_eq!(AsRef::<str>::as_ref(&host), "mon1");
    }

    #[test]
    fn host_name_short_strips_domain() {
        assert_eq!(HostName::new("mon1.dc1.example.com").short(), "mon1");
        assert_eq!(HostName::new("mon1").short(), "mon1");
    }

    #[test]
    fn cluster_name_serde_is_transparent() {
        let c = ClusterName::new("ceph");
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"ceph\"");
        let back: ClusterName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn key_kind_file_names() {
        let c = ClusterName::new("test");
        let names: Vec<String> = KeyKind::ALL.iter().map(|k| k.file_name(&c)).collect();
        assert_eq!(
            names,
            vec![
                "test.mon.keyring",
                "test.client.admin.keyring",
                "test.bootstrap-osd.keyring",
                "test.bootstrap-mds.keyring",
                "test.bootstrap-rgw.keyring",
            ]
        );
    }

    #[test]
    fn key_kind_entities() {
        assert_eq!(KeyKind::Mon.entity(), "mon.");
        assert_eq!(KeyKind::Admin.entity(), "client.admin");
        assert_eq!(KeyKind::BootstrapRgw.entity(), "client.bootstrap-rgw");
    }

    #[test]
    fn only_mon_has_no_caps() {
        for kind in KeyKind::ALL {
            assert_eq!(kind.caps().is_empty(), kind == KeyKind::Mon, "{kind}");
        }
    }
}
