//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 Agent 循环决定终止为 FAILED 还是 CANCELLED。
//! 平台错误在到达这里之前已经由 RetryExecutor 处理过，因此这里只有终止类动作。

use crate::core::error::AgentError;
use crate::core::state::AgentStatus;

/// 循环遇到错误后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 永久错误或重试耗尽：终止为 FAILED
    Fail,
    /// 观察到取消：终止为 CANCELLED
    Cancel,
}

impl RecoveryAction {
    pub fn status(&self) -> AgentStatus {
        match self {
            Self::Fail => AgentStatus::Failed,
            Self::Cancel => AgentStatus::Cancelled,
        }
    }
}

/// 将错误映射为终止动作，并按类别输出日志
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError, step: usize) -> RecoveryAction {
        match err {
            AgentError::Cancelled => {
                tracing::info!(step, "cancellation observed");
                RecoveryAction::Cancel
            }
            AgentError::Validation { kind, detail } => {
                tracing::error!(step, kind = %kind, detail = %detail, "invalid action from brain");
                RecoveryAction::Fail
            }
            AgentError::Resolution { kind, detail } => {
                tracing::error!(step, kind = %kind, detail = %detail, "target could not be resolved");
                RecoveryAction::Fail
            }
            AgentError::Brain(_) | AgentError::BrainTimeout(_) => {
                tracing::error!(step, error = %err, "brain failed to decide");
                RecoveryAction::Fail
            }
            AgentError::RetryExhausted(e) => {
                tracing::error!(step, attempts = e.failures.len(), error = %e, "dispatch retries exhausted");
                RecoveryAction::Fail
            }
            other => {
                tracing::error!(step, error = %other, "step failed");
                RecoveryAction::Fail
            }
        }
    }
}
