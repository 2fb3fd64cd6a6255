use serde::Serialize;
use std::fmt;

/// Life-cycle state of the supervised game server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerProcessState {
    Stopped,
    Starting,
    Running,
    Reloading,
    Draining,
    Crashed,
}

impl ServerProcessState {
    pub const ALL: [ServerProcessState; 6] = [
        Self::Stopped,
        Self::Starting,
        Self::Running,
        Self::Reloading,
        Self::Draining,
        Self::Crashed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Reloading => "reloading",
            Self::Draining => "draining",
            Self::Crashed => "crashed",
        }
    }

    /// Whether the process is expected to answer queries.
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Running | Self::Draining)
    }
}

impl fmt::Display for ServerProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
