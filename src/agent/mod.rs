//! Agent 主控循环：感知 → 决策 → 执行，直到完成、步数用尽、失败或取消
//!
//! - `ComputerAgent`：同步循环，阻塞调用线程
//! - `AsyncComputerAgent`：tokio 上的协作式循环，所有等待点都响应取消
//!
//! 两者共享状态机与终止规则（见 `AgentStatus`）。`run` 以 `&mut self` 执行，
//! 同一实例不会有两个步骤并发；`AgentHandle` 可在其他线程 / 任务中查询进度或取消。

pub mod async_loop;
pub mod sync_loop;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::{
    Action, AgentError, AgentStatus, AgentTermination, RetryConfig, StepOutcome, TerminationCause,
};
use crate::history::{History, StepRecord};
use crate::observability::ActionLog;

pub use async_loop::AsyncComputerAgent;
pub use sync_loop::ComputerAgent;

/// Agent 配置；构建后在 Agent 生命周期内不变
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// 每个动作之后的等待
    pub action_delay: Duration,
    /// 每次截屏之前的等待
    pub screenshot_delay: Duration,
    pub max_steps: usize,
    pub annotate_screenshot: bool,
    pub record_history: bool,
    /// 异步循环中 think 与单次派发的超时；None 表示不限
    pub step_timeout: Option<Duration>,
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            action_delay: Duration::from_secs(1),
            screenshot_delay: Duration::from_millis(500),
            max_steps: 100,
            annotate_screenshot: true,
            record_history: true,
            step_timeout: Some(Duration::from_secs(60)),
            retry: RetryConfig::standard(),
        }
    }
}

impl AgentConfig {
    /// 无等待的配置（测试、回放）
    pub fn immediate(max_steps: usize) -> Self {
        Self {
            action_delay: Duration::ZERO,
            screenshot_delay: Duration::ZERO,
            max_steps,
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_steps == 0 {
            return Err(AgentError::Config("max_steps must be > 0".into()));
        }
        if self.step_timeout.is_some_and(|t| t.is_zero()) {
            return Err(AgentError::Config("step_timeout must be > 0 when set".into()));
        }
        self.retry.validate()
    }
}

/// 一次运行的结构化结果
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub status: AgentStatus,
    /// 成功执行的步数
    pub steps: usize,
    pub last_error: Option<AgentError>,
    /// 关闭 record_history 时为 None
    pub history: Option<Vec<StepRecord>>,
    /// DONE 动作携带的总结
    pub summary: Option<String>,
}

impl AgentRun {
    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Completed
    }

    pub fn termination_cause(&self) -> Option<TerminationCause> {
        self.status.termination_cause()
    }

    /// 仅 Brain 主动完成视为成功，其余终态转为 AgentTermination
    pub fn into_result(self) -> Result<AgentRun, AgentTermination> {
        match self.termination_cause() {
            Some(TerminationCause::BrainDone) => Ok(self),
            cause => Err(AgentTermination {
                cause: cause.unwrap_or(TerminationCause::FatalError),
                steps: self.steps,
                last_error: self.last_error,
            }),
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    status: Mutex<AgentStatus>,
    step: AtomicUsize,
    running: AtomicBool,
}

/// 跨线程的只读进度视图 + 取消入口
#[derive(Debug, Clone)]
pub struct AgentHandle {
    progress: Arc<Progress>,
    cancel: CancellationToken,
}

impl AgentHandle {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            progress: Arc::new(Progress::default()),
            cancel,
        }
    }

    pub fn status(&self) -> AgentStatus {
        *self
            .progress
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 已成功执行的步数
    pub fn current_step(&self) -> usize {
        self.progress.step.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.progress.running.load(Ordering::SeqCst)
    }

    /// 协作式取消：在下一个检查点生效，已派发的调用不会被中断
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_status(&self, status: AgentStatus) {
        *self
            .progress
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }
}

/// 单次运行的记录器：步数、历史与状态投影
pub(crate) struct RunRecorder {
    handle: AgentHandle,
    log: Arc<dyn ActionLog>,
    max_steps: usize,
    record_history: bool,
    steps: usize,
    history: History,
}

impl RunRecorder {
    pub(crate) fn begin(
        handle: &AgentHandle,
        log: &Arc<dyn ActionLog>,
        config: &AgentConfig,
        task: &str,
    ) -> Self {
        handle.progress.step.store(0, Ordering::SeqCst);
        handle.progress.running.store(true, Ordering::SeqCst);
        handle.set_status(AgentStatus::Running);
        tracing::info!(task, max_steps = config.max_steps, "agent run started");
        Self {
            handle: handle.clone(),
            log: Arc::clone(log),
            max_steps: config.max_steps,
            record_history: config.record_history,
            steps: 0,
            history: History::new(),
        }
    }

    pub(crate) fn budget_spent(&self) -> bool {
        self.steps >= self.max_steps
    }

    /// 开始下一步并返回其序号（从 1 开始）
    pub(crate) fn start_step(&self) -> usize {
        let index = self.steps + 1;
        self.log.step_started(index, self.max_steps);
        index
    }

    pub(crate) fn succeeded(&mut self, action: Action, outcome: &StepOutcome) {
        self.steps += 1;
        self.handle.progress.step.store(self.steps, Ordering::SeqCst);
        if self.record_history {
            self.history
                .push(StepRecord::succeeded(self.steps, action, outcome));
        }
    }

    pub(crate) fn failed(&mut self, action: Action, err: &AgentError, latency: Duration) {
        if self.record_history {
            self.history
                .push(StepRecord::failed(self.steps + 1, action, err, latency));
        }
    }

    pub(crate) fn finish(
        self,
        status: AgentStatus,
        last_error: Option<AgentError>,
        summary: Option<String>,
    ) -> AgentRun {
        self.handle.set_status(status);
        self.handle.progress.running.store(false, Ordering::SeqCst);
        self.log.run_finished(status, self.steps);
        match &last_error {
            Some(err) => tracing::warn!(status = %status, steps = self.steps, error = %err, "agent stopped"),
            None => tracing::info!(status = %status, steps = self.steps, "agent stopped"),
        }
        AgentRun {
            status,
            steps: self.steps,
            last_error,
            history: self.record_history.then(|| self.history.into_records()),
            summary,
        }
    }
}
