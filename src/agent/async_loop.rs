//! 异步主控循环（tokio）
//!
//! 状态机与同步循环一致。截屏 / 检测 / 派发在阻塞线程池执行，调度器只在以下位置挂起：
//! 截屏前等待、截屏、think、派发（含重试等待）、动作后等待。每个挂起点之前检查取消令牌，
//! 等待期间与取消竞争。think 超时不可重试，直接 FAILED；派发超时按 TIMEOUT 交给重试谓词。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::{AgentConfig, AgentHandle, AgentRun, RunRecorder};
use crate::brain::AsyncBrain;
use crate::core::{
    Action, ActionExecutor, AgentError, AgentStatus, PlatformError, PlatformErrorKind,
    RecoveryEngine, RetryStats, ScreenState,
};
use crate::history::StepRecord;
use crate::observability::{ActionLog, TracingActionLog};
use crate::platform::PlatformController;
use crate::vision::{Annotator, ElementDetector, Perception};

/// 异步 Agent
pub struct AsyncComputerAgent<B> {
    brain: B,
    config: AgentConfig,
    perception: Perception,
    executor: ActionExecutor,
    recovery: RecoveryEngine,
    log: Arc<dyn ActionLog>,
    handle: AgentHandle,
    last_run: Option<AgentRun>,
}

impl<B: AsyncBrain> AsyncComputerAgent<B> {
    pub fn new(
        brain: B,
        platform: Arc<dyn PlatformController>,
        config: AgentConfig,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let log: Arc<dyn ActionLog> = Arc::new(TracingActionLog);
        Ok(Self {
            brain,
            perception: Perception::new(platform),
            executor: ActionExecutor::new(config.retry.clone()).with_action_log(Arc::clone(&log)),
            recovery: RecoveryEngine::new(),
            log,
            handle: AgentHandle::new(CancellationToken::new()),
            last_run: None,
            config,
        })
    }

    pub fn with_detector(mut self, detector: Arc<dyn ElementDetector>) -> Self {
        self.perception = self.perception.with_detector(detector);
        self
    }

    pub fn with_annotator(mut self, annotator: Arc<dyn Annotator>) -> Self {
        self.perception = self.perception.with_annotator(annotator);
        self
    }

    pub fn with_action_log(mut self, log: Arc<dyn ActionLog>) -> Self {
        self.executor = ActionExecutor::new(self.config.retry.clone()).with_action_log(Arc::clone(&log));
        self.log = log;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.handle = AgentHandle::new(token);
        self
    }

    /// 运行直到终态
    pub async fn run(&mut self, task: &str) -> AgentRun {
        let mut run = RunRecorder::begin(&self.handle, &self.log, &self.config, task);
        let cancel = self.handle.cancel_token();

        let (status, last_error, summary) = loop {
            if run.budget_spent() {
                break (AgentStatus::MaxSteps, None, None);
            }
            if cancel.is_cancelled() {
                break (AgentStatus::Cancelled, None, None);
            }
            let index = run.start_step();

            if !pause(self.config.screenshot_delay, &cancel).await {
                break (AgentStatus::Cancelled, None, None);
            }
            let state = match self.capture(&cancel).await {
                Ok(state) => state,
                Err(err) => {
                    let action = self.recovery.handle(&err, index);
                    break (action.status(), Some(err), None);
                }
            };

            if cancel.is_cancelled() {
                break (AgentStatus::Cancelled, None, None);
            }
            if !self.brain.should_continue(index, &state).await {
                tracing::info!(step = index, "brain asked to stop");
                break (AgentStatus::Completed, None, None);
            }
            let action = match self.think(&state, task, &cancel).await {
                Ok(action) => action,
                Err(err) => {
                    let action = self.recovery.handle(&err, index);
                    break (action.status(), Some(err), None);
                }
            };
            if let Action::Done { summary } = &action {
                tracing::info!(step = index, "task completed by brain");
                break (AgentStatus::Completed, None, summary.clone());
            }

            if cancel.is_cancelled() {
                break (AgentStatus::Cancelled, None, None);
            }
            let started = Instant::now();
            let result = self
                .executor
                .execute_async(
                    &action,
                    &state,
                    Arc::clone(self.perception.platform()),
                    self.config.step_timeout,
                    &cancel,
                )
                .await;
            match result {
                Ok(outcome) => {
                    self.brain.on_action_result(&action, Ok(&outcome)).await;
                    run.succeeded(action, &outcome);
                }
                Err(AgentError::Cancelled) => break (AgentStatus::Cancelled, None, None),
                Err(err) => {
                    self.brain.on_action_result(&action, Err(&err)).await;
                    run.failed(action, &err, started.elapsed());
                    let recovery = self.recovery.handle(&err, index);
                    break (recovery.status(), Some(err), None);
                }
            }

            if !pause(self.config.action_delay, &cancel).await {
                break (AgentStatus::Cancelled, None, None);
            }
        };

        let result = run.finish(status, last_error, summary);
        self.last_run = Some(result.clone());
        result
    }

    /// 截屏 + 检测 + 标注；受 step_timeout 约束，超时不重试，直接终止为 FAILED
    async fn capture(&self, cancel: &CancellationToken) -> Result<ScreenState, AgentError> {
        let perception = self.perception.clone();
        let annotate = self.config.annotate_screenshot;
        let limit = self.config.step_timeout;
        let task = tokio::task::spawn_blocking(move || perception.capture(annotate));
        let captured = async {
            let joined = match limit {
                Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                    AgentError::from(PlatformError::timeout(format!(
                        "screen capture exceeded {limit:?}"
                    )))
                })?,
                None => task.await,
            };
            joined.map_err(|e| {
                AgentError::from(PlatformError::new(
                    PlatformErrorKind::Other,
                    format!("screen capture aborted: {e}"),
                ))
            })?
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            captured = captured => captured,
        }
    }

    async fn think(
        &mut self,
        state: &ScreenState,
        task: &str,
        cancel: &CancellationToken,
    ) -> Result<Action, AgentError> {
        let limit = self.config.step_timeout;
        let think = self.brain.think(state, task);
        let decided = async {
            let decision = match limit {
                Some(limit) => tokio::time::timeout(limit, think)
                    .await
                    .map_err(|_| AgentError::BrainTimeout(limit))?,
                None => think.await,
            };
            decision.map_err(AgentError::brain)
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            decided = decided => decided,
        }
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.handle.cancel_token()
    }

    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> AgentStatus {
        self.handle.status()
    }

    pub fn current_step(&self) -> usize {
        self.handle.current_step()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn history(&self) -> &[StepRecord] {
        self.last_run
            .as_ref()
            .and_then(|run| run.history.as_deref())
            .unwrap_or(&[])
    }

    pub fn last_run(&self) -> Option<&AgentRun> {
        self.last_run.as_ref()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.executor.retry_stats()
    }

    pub fn brain(&self) -> &B {
        &self.brain
    }
}

/// 可被取消的等待；返回 false 表示等待期间收到取消
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
