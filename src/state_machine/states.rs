use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskExecState {
    /// Created but not yet handed to a worker
    None,
    /// Assigned to a worker core and running
    InProgress,
    /// Completed successfully
    Ok,
    /// Failed; may be re-offered while tries remain
    Error,
    /// Failed permanently, never re-offered
    Broken,
}

impl TaskExecState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Broken)
    }

    /// Only `Ok` satisfies a descendant's readiness check.
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProgress)
    }
}

impl Default for TaskExecState {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for TaskExecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
            Self::Broken => write!(f, "broken"),
        }
    }
}

impl std::str::FromStr for TaskExecState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "in_progress" => Ok(Self::InProgress),
            "ok" => Ok(Self::Ok),
            "error" => Ok(Self::Error),
            "broken" => Ok(Self::Broken),
            _ => Err(format!("Invalid task exec state: {s}")),
        }
    }
}

/// Lifecycle state of one running pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecContextState {
    None,
    Producing,
    Produced,
    Started,
    Stopped,
    Finished,
    Error,
}

impl ExecContextState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }

    /// Only a started context accepts worker results and hands out tasks.
    pub fn accepts_results(&self) -> bool {
        matches!(self, Self::Started)
    }
}

impl Default for ExecContextState {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for ExecContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Producing => write!(f, "producing"),
            Self::Produced => write!(f, "produced"),
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
            Self::Finished => write!(f, "finished"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_terminal_check() {
        assert!(TaskExecState::Ok.is_terminal());
        assert!(TaskExecState::Broken.is_terminal());
        assert!(!TaskExecState::None.is_terminal());
        assert!(!TaskExecState::InProgress.is_terminal());
        assert!(!TaskExecState::Error.is_terminal());
    }

    #[test]
    fn test_dependency_satisfaction() {
        assert!(TaskExecState::Ok.satisfies_dependencies());
        assert!(!TaskExecState::Broken.satisfies_dependencies());
        assert!(!TaskExecState::Error.satisfies_dependencies());
        assert!(!TaskExecState::InProgress.satisfies_dependencies());
    }

    #[test]
    fn test_state_string_round_trip() {
        assert_eq!(TaskExecState::InProgress.to_string(), "in_progress");
        assert_eq!("broken".parse::<TaskExecState>().unwrap(), TaskExecState::Broken);
        assert!("bogus".parse::<TaskExecState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&TaskExecState::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: TaskExecState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TaskExecState::InProgress);
    }

    #[test]
    fn test_context_accepts_results() {
        assert!(ExecContextState::Started.accepts_results());
        assert!(!ExecContextState::Stopped.accepts_results());
        assert!(!ExecContextState::Finished.accepts_results());
    }
}
