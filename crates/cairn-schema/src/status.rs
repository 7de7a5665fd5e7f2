//! Monitor status document as reported by a monitor's admin socket
//! (`mon_status`), and its classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status output was not JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("status document has no '{0}' field")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonMapEntry {
    pub name: String,
    pub rank: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonMap {
    #[serde(default)]
    pub epoch: u64,
    pub mons: Vec<MonMapEntry>,
}

/// The fields of `mon_status` the bootstrap tooling relies on.
///
/// `quorum` and `monmap.mons` are optional at the serde level so that a
/// monitor which is still probing can be parsed; [`MonStatus::require_complete`]
/// rejects such documents where a full answer is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonStatus {
    #[serde(default)]
    pub name: Option<String>,
    pub rank: i64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub quorum: Option<Vec<i64>>,
    #[serde(default)]
    pub monmap: Option<MonMap>,
}

/// Observable status of a monitor daemon, re-derived on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorStatus {
    NotRunning,
    Transitioning,
    Running,
    InQuorum,
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::NotRunning => write!(f, "not running"),
            MonitorStatus::Transitioning => write!(f, "running, not in quorum"),
            MonitorStatus::Running => write!(f, "running"),
            MonitorStatus::InQuorum => write!(f, "in quorum"),
        }
    }
}

/// States in which a monitor is a member of a formed quorum.
pub const QUORUM_STATES: [&str; 2] = ["leader", "peon"];

impl MonStatus {
    pub fn parse(input: &str) -> Result<Self, StatusError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn has_quorum_state(&self) -> bool {
        QUORUM_STATES.contains(&self.state.as_str())
    }

    /// Classify the daemon: a non-negative rank means it is running, rank -1
    /// with a state means it is running but still joining, anything else is
    /// not running. A quorum state only counts once the document lists both
    /// the quorum and the monmap.
    pub fn classify(&self) -> MonitorStatus {
        if self.rank >= 0 {
            if self.has_quorum_state() && self.require_complete().is_ok() {
                MonitorStatus::InQuorum
            } else {
                MonitorStatus::Running
            }
        } else if self.rank == -1 && !self.state.is_empty() {
            MonitorStatus::Transitioning
        } else {
            MonitorStatus::NotRunning
        }
    }

    /// Fail unless both `quorum` and `monmap.mons` are present.
    pub fn require_complete(&self) -> Result<(&[i64], &[MonMapEntry]), StatusError> {
        let quorum = self.quorum.as_deref().ok_or(StatusError::Missing("quorum"))?;
        let mons = self
            .monmap
            .as_ref()
            .map(|m| m.mons.as_slice())
            .ok_or(StatusError::Missing("monmap.mons"))?;
        Ok((quorum, mons))
    }

    /// Rank recorded for `name` in the monmap, if the monitor is listed.
    pub fn monmap_rank(&self, name: &str) -> Option<i64> {
        self.monmap
            .as_ref()?
            .mons
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.rank)
    }

    /// Whether `name` is listed in the monmap and its rank is in the quorum set.
    pub fn member_in_quorum(&self, name: &str) -> Result<bool, StatusError> {
        let (quorum, _) = self.require_complete()?;
        Ok(self
            .monmap_rank(name)
            .is_some_and(|rank| quorum.contains(&rank)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(rank: i64, state: &str) -> String {
        format!(
            r#"{{"name":"a","rank":{rank},"state":"{state}","quorum":[0,1],
               "monmap":{{"epoch":1,"mons":[{{"name":"a","rank":0}},{{"name":"b","rank":1}}]}}}}"#
        )
    }

    #[test]
    fn leader_is_in_quorum() {
        let s = MonStatus::parse(&doc(0, "leader")).unwrap();
        assert_eq!(s.classify(), MonitorStatus::InQuorum);
        assert!(s.member_in_quorum("a").unwrap());
    }

    #[test]
    fn peon_is_in_quorum() {
        let s = MonStatus::parse(&doc(1, "peon")).unwrap();
        assert_eq!(s.classify(), MonitorStatus::InQuorum);
    }

    #[test]
    fn ranked_but_electing_is_running() {
        let s = MonStatus::parse(&doc(0, "electing")).unwrap();
        assert_eq!(s.classify(), MonitorStatus::Running);
    }

    #[test]
    fn unranked_probing_is_transitioning() {
        let s = MonStatus::parse(r#"{"rank":-1,"state":"probing"}"#).unwrap();
        assert_eq!(s.classify(), MonitorStatus::Transitioning);
    }

    #[test]
    fn unranked_without_state_is_not_running() {
        let s = MonStatus::parse(r#"{"rank":-1,"state":""}"#).unwrap();
        assert_eq!(s.classify(), MonitorStatus::NotRunning);
        let s = MonStatus::parse(r#"{"rank":-2,"state":"probing"}"#).unwrap();
        assert_eq!(s.classify(), MonitorStatus::NotRunning);
    }

    #[test]
    fn missing_quorum_is_incomplete() {
        let s = MonStatus::parse(
            r#"{"rank":0,"state":"leader","monmap":{"mons":[{"name":"a","rank":0}]}}"#,
        )
        .unwrap();
        assert!(matches!(
            s.require_complete(),
            Err(StatusError::Missing("quorum"))
        ));
    }

    #[test]
    fn missing_monmap_is_incomplete() {
        let s = MonStatus::parse(r#"{"rank":0,"state":"leader","quorum":[0]}"#).unwrap();
        assert!(matches!(
            s.require_complete(),
            Err(StatusError::Missing("monmap.mons"))
        ));
    }

    #[test]
    fn incomplete_leader_is_only_running() {
        let s = MonStatus::parse(r#"{"rank":0,"state":"leader"}"#).unwrap();
        assert!(s.has_quorum_state());
        assert_eq!(s.classify(), MonitorStatus::Running);
    }

    #[test]
    fn member_not_in_monmap_is_not_in_quorum() {
        let s = MonStatus::parse(&doc(0, "leader")).unwrap();
        assert!(!s.member_in_quorum("c").unwrap());
    }

    #[test]
    fn member_ranked_outside_quorum() {
        let s = MonStatus::parse(
            r#"{"rank":2,"state":"electing","quorum":[0,1],
                "monmap":{"mons":[{"name":"a","rank":0},{"name":"b","rank":1},{"name":"c","rank":2}]}}"#,
        )
        .unwrap();
        assert_eq!(s.monmap_rank("c"), Some(2));
        assert!(!s.member_in_quorum("c").unwrap());
    }

    #[test]
    fn garbage_is_parse_error() {
        assert!(matches!(
            MonStatus::parse("admin_socket: connect failed"),
            Err(StatusError::Parse(_))
        ));
    }

    #[test]
    fn missing_rank_is_parse_error() {
        assert!(MonStatus::parse(r#"{"state":"leader"}"#).is_err());
    }
}
