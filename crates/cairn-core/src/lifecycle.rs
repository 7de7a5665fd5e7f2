use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// Progress of one monitor through bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorStage {
    Absent,
    DataDirCreated,
    KeyringSeeded,
    DaemonStarted,
    Polled,
}

impl MonitorStage {
    pub fn next(self) -> Option<Self> {
        match self {
            MonitorStage::Absent => Some(MonitorStage::DataDirCreated),
            MonitorStage::DataDirCreated => Some(MonitorStage::KeyringSeeded),
            MonitorStage::KeyringSeeded => Some(MonitorStage::DaemonStarted),
            MonitorStage::DaemonStarted => Some(MonitorStage::Polled),
            MonitorStage::Polled => None,
        }
    }
}

impl fmt::Display for MonitorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MonitorStage::Absent => "absent",
            MonitorStage::DataDirCreated => "data-dir-created",
            MonitorStage::KeyringSeeded => "keyring-seeded",
            MonitorStage::DaemonStarted => "daemon-started",
            MonitorStage::Polled => "polled",
        };
        f.write_str(s)
    }
}

/// Stages advance one at a time. Repeating a stage is allowed so a monitor
/// can be bootstrapped again; skipping one is not.
pub fn validate_transition(from: MonitorStage, to: MonitorStage) -> Result<(), CoreError> {
    if to == from || from.next() == Some(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use MonitorStage::*;
        assert!(validate_transition(Absent, DataDirCreated).is_ok());
        assert!(validate_transition(DataDirCreated, KeyringSeeded).is_ok());
        assert!(validate_transition(KeyringSeeded, DaemonStarted).is_ok());
        assert!(validate_transition(DaemonStarted, Polled).is_ok());
        assert!(validate_transition(Polled, Polled).is_ok()); // re-poll
        assert!(validate_transition(DaemonStarted, DaemonStarted).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        use MonitorStage::*;
        assert!(validate_transition(Absent, KeyringSeeded).is_err());
        assert!(validate_transition(Absent, Polled).is_err());
        assert!(validate_transition(DataDirCreated, DaemonStarted).is_err());
        assert!(validate_transition(Polled, Absent).is_err());
        assert!(validate_transition(DaemonStarted, KeyringSeeded).is_err());
    }

    #[test]
    fn error_names_both_stages() {
        let err = validate_transition(MonitorStage::Absent, MonitorStage::Polled).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("absent"));
        assert!(msg.contains("polled"));
    }
}
