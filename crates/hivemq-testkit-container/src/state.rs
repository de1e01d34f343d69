//! Lifecycle states of a broker container

use serde::Serialize;
use std::fmt;

/// Where a container handle is in its lifecycle
///
/// ```text
/// Created --start--> Starting --> Running --wait_until_ready--> ReadinessPending --> Ready
/// Starting | Running | ReadinessPending | Ready --stop--> Stopping --> Stopped
/// any non-terminal state --error--> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    ReadinessPending,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// States in which the broker process is up and files can be copied in live
    pub fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::ReadinessPending | Self::Ready)
    }

    /// Whether the controller may move from `self` to `next`
    pub fn can_transition_to(self, next: Self) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (Failed, _) | (Stopped, _) => false,
            (_, Failed) => true,
            (Created, Starting) | (Created, Stopped) => true,
            (Starting, Running) | (Running, ReadinessPending) | (ReadinessPending, Ready) => true,
            (Starting | Running | ReadinessPending | Ready, Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ReadinessPending => "readiness-pending",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}
