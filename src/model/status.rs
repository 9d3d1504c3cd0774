use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job or step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Execution record created, flow not yet running
    #[default]
    Starting,
    /// Execution is actively running
    Started,
    /// Execution finished successfully
    Completed,
    /// Execution finished with a failure
    Failed,
    /// A cooperative stop has been requested; the engine will exit at the
    /// next chunk or node boundary
    Stopping,
    /// Execution exited early on a stop request; committed chunks are intact
    Stopped,
}

impl BatchStatus {
    /// Terminal statuses are immutable once persisted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Check whether the execution is still active (counts against
    /// single-running-execution-per-instance).
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }

    /// Only failed executions may be restarted.
    pub fn is_restartable(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "STARTING"),
            Self::Started => write!(f, "STARTED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTING" => Ok(Self::Starting),
            "STARTED" => Ok(Self::Started),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "STOPPING" => Ok(Self::Stopping),
            "STOPPED" => Ok(Self::Stopped),
            _ => Err(format!("Invalid batch status: {s}")),
        }
    }
}

/// String outcome of a node's execution, used by the flow controller to
/// select the next transition. Deciders emit custom codes (e.g.
/// `LIGHT_PROCESSING`); steps normally emit `COMPLETED` or `FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub code: String,
    pub description: String,
}

impl ExitStatus {
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const FAILED: &'static str = "FAILED";
    pub const STOPPED: &'static str = "STOPPED";

    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: String::new(),
        }
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_failed(&self) -> bool {
        self.code == Self::FAILED
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::completed()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}
