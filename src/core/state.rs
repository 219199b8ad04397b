//! Agent 运行状态机
//!
//! `INIT → RUNNING → {COMPLETED | MAX_STEPS | FAILED | CANCELLED}`；终态互斥且不可离开。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::TerminationCause;

/// 循环状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    #[default]
    Init,
    Running,
    Completed,
    MaxSteps,
    Failed,
    Cancelled,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Init | Self::Running)
    }

    /// 终态对应的终止原因；非终态返回 None
    pub fn termination_cause(&self) -> Option<TerminationCause> {
        match self {
            Self::Completed => Some(TerminationCause::BrainDone),
            Self::MaxSteps => Some(TerminationCause::MaxSteps),
            Self::Failed => Some(TerminationCause::FatalError),
            Self::Cancelled => Some(TerminationCause::Cancelled),
            Self::Init | Self::Running => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::MaxSteps => "MAX_STEPS",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
