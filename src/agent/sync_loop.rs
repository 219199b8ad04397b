//! 同步主控循环
//!
//! 每一步：等待 screenshot_delay → 截屏 / 检测 / 标注 → brain.think → DONE 则完成，
//! 否则交给 ActionExecutor → 记录 → 等待 action_delay。取消只在步首检查。

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::{AgentConfig, AgentHandle, AgentRun, RunRecorder};
use crate::brain::Brain;
use crate::core::{
    Action, ActionExecutor, AgentError, AgentStatus, RecoveryEngine, RetryStats,
};
use crate::history::StepRecord;
use crate::observability::{ActionLog, TracingActionLog};
use crate::platform::PlatformController;
use crate::vision::{Annotator, ElementDetector, Perception};

/// 同步 Agent：连接 Brain 与平台
pub struct ComputerAgent<B> {
    brain: B,
    config: AgentConfig,
    perception: Perception,
    executor: ActionExecutor,
    recovery: RecoveryEngine,
    log: Arc<dyn ActionLog>,
    handle: AgentHandle,
    last_run: Option<AgentRun>,
}

impl<B: Brain> ComputerAgent<B> {
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

    /// 使用外部取消令牌（如与宿主程序的关闭信号联动）
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.handle = AgentHandle::new(token);
        self
    }

    /// 运行直到终态；返回值始终携带状态、步数、最后错误与历史
    pub fn run(&mut self, task: &str) -> AgentRun {
        let mut run = RunRecorder::begin(&self.handle, &self.log, &self.config, task);

        let (status, last_error, summary) = loop {
            if run.budget_spent() {
                break (AgentStatus::MaxSteps, None, None);
            }
            if self.handle.is_cancelled() {
                break (AgentStatus::Cancelled, None, None);
            }
            let index = run.start_step();

            if !self.config.screenshot_delay.is_zero() {
                std::thread::sleep(self.config.screenshot_delay);
            }
            let state = match self.perception.capture(self.config.annotate_screenshot) {
                Ok(state) => state,
                Err(err) => {
                    let action = self.recovery.handle(&err, index);
                    break (action.status(), Some(err), None);
                }
            };

            if !self.brain.should_continue(index, &state) {
                tracing::info!(step = index, "brain asked to stop");
                break (AgentStatus::Completed, None, None);
            }
            let action = match self.brain.think(&state, task) {
                Ok(action) => action,
                Err(err) => {
                    let err = AgentError::brain(err);
                    let action = self.recovery.handle(&err, index);
                    break (action.status(), Some(err), None);
                }
            };
            if let Action::Done { summary } = &action {
                tracing::info!(step = index, "task completed by brain");
                break (AgentStatus::Completed, None, summary.clone());
            }

            let started = Instant::now();
            match self
                .executor
                .execute(&action, &state, self.perception.platform().as_ref())
            {
                Ok(outcome) => {
                    self.brain.on_action_result(&action, Ok(&outcome));
                    run.succeeded(action, &outcome);
                }
                Err(err) => {
                    self.brain.on_action_result(&action, Err(&err));
                    run.failed(action, &err, started.elapsed());
                    let recovery = self.recovery.handle(&err, index);
                    break (recovery.status(), Some(err), None);
                }
            }

            if !self.config.action_delay.is_zero() {
                std::thread::sleep(self.config.action_delay);
            }
        };

        let result = run.finish(status, last_error, summary);
        self.last_run = Some(result.clone());
        result
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

    /// 最近一次运行的步骤历史
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

    pub fn brain_mut(&mut self) -> &mut B {
        &mut self.brain
    }
}
