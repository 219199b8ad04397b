//! 步骤历史与调试会话
//!
//! `History` 由循环独占、只追加；外部只读。`DebugSession` 把一次运行的全部帧
//! 序列化为 JSON 文件，供离线回放或报告生成使用。

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentRun;
use crate::core::{Action, AgentError, AgentStatus, ErrorKind, Pixel, StepOutcome};

/// 单步记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 从 1 开始
    pub index: usize,
    pub action: Action,
    pub resolved: Option<Pixel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Pixel>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

impl StepRecord {
    pub fn succeeded(index: usize, action: Action, outcome: &StepOutcome) -> Self {
        Self {
            index,
            action,
            resolved: outcome.target,
            end: outcome.end,
            success: true,
            error: None,
            error_kind: None,
            attempts: outcome.attempts,
            latency: outcome.latency,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(index: usize, action: Action, err: &AgentError, latency: Duration) -> Self {
        let attempts = match err {
            AgentError::RetryExhausted(e) => e.failures.len() as u32,
            _ => 0,
        };
        Self {
            index,
            action,
            resolved: None,
            end: None,
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            attempts,
            latency,
            timestamp: Utc::now(),
        }
    }
}

/// 只追加的步骤历史
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    records: Vec<StepRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: StepRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.records.iter().filter(|r| r.success).count()
    }

    pub fn into_records(self) -> Vec<StepRecord> {
        self.records
    }
}

/// 调试会话：一次运行的完整记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSession {
    pub session_id: Uuid,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: AgentStatus,
    pub steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub frames: Vec<StepRecord>,
}

impl DebugSession {
    pub fn start(task: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            task: task.into(),
            started_at: Utc::now(),
            ended_at: None,
            status: AgentStatus::Running,
            steps: 0,
            last_error: None,
            frames: Vec::new(),
        }
    }

    /// 用运行结果收尾
    pub fn finish(&mut self, run: &AgentRun) {
        self.ended_at = Some(Utc::now());
        self.status = run.status;
        self.steps = run.steps;
        self.last_error = run.last_error.as_ref().map(ToString::to_string);
        self.frames = run.history.clone().unwrap_or_default();
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        tracing::debug!(path = %path.display(), frames = self.frames.len(), "debug session saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}
