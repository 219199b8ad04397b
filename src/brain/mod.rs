//! Brain 接口：根据屏幕状态与任务决定下一步动作
//!
//! 决策逻辑在核心之外实现（LLM、规则、脚本）。同步循环使用 `Brain`，
//! 异步循环使用 `AsyncBrain`；`SyncBrainAdapter` 让同步实现也能跑在异步循环里。
//! Brain 的错误不重试，直接让本次运行失败。

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::core::{Action, AgentError, ScreenState, StepOutcome};

/// 同步 Brain
pub trait Brain: Send {
    /// 返回 DONE 表示任务完成
    fn think(&mut self, state: &ScreenState, task: &str) -> anyhow::Result<Action>;

    /// 每个已派发动作的结果回调
    fn on_action_result(&mut self, _action: &Action, _outcome: Result<&StepOutcome, &AgentError>) {}

    /// 每步开始前询问是否继续；false 视为任务完成
    fn should_continue(&mut self, _step: usize, _state: &ScreenState) -> bool {
        true
    }
}

impl<B: Brain + ?Sized> Brain for Box<B> {
    fn think(&mut self, state: &ScreenState, task: &str) -> anyhow::Result<Action> {
        (**self).think(state, task)
    }

    fn on_action_result(&mut self, action: &Action, outcome: Result<&StepOutcome, &AgentError>) {
        (**self).on_action_result(action, outcome)
    }

    fn should_continue(&mut self, step: usize, state: &ScreenState) -> bool {
        (**self).should_continue(step, state)
    }
}

/// 异步 Brain（如调用远端模型）
#[async_trait]
pub trait AsyncBrain: Send {
    async fn think(&mut self, state: &ScreenState, task: &str) -> anyhow::Result<Action>;

    async fn on_action_result(&mut self, _action: &Action, _outcome: Result<&StepOutcome, &AgentError>) {}

    async fn should_continue(&mut self, _step: usize, _state: &ScreenState) -> bool {
        true
    }
}

/// 把同步 Brain 包装为 AsyncBrain；think 在调度线程上直接执行
#[derive(Debug)]
pub struct SyncBrainAdapter<B> {
    inner: B,
}

impl<B: Brain> SyncBrainAdapter<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

#[async_trait]
impl<B: Brain> AsyncBrain for SyncBrainAdapter<B> {
    async fn think(&mut self, state: &ScreenState, task: &str) -> anyhow::Result<Action> {
        self.inner.think(state, task)
    }

    async fn on_action_result(&mut self, action: &Action, outcome: Result<&StepOutcome, &AgentError>) {
        self.inner.on_action_result(action, outcome)
    }

    async fn should_continue(&mut self, step: usize, state: &ScreenState) -> bool {
        self.inner.should_continue(step, state)
    }
}

/// 闭包 Brain
pub struct FnBrain<F> {
    think: F,
}

impl<F> FnBrain<F>
where
    F: FnMut(&ScreenState, &str) -> anyhow::Result<Action> + Send,
{
    pub fn new(think: F) -> Self {
        Self { think }
    }
}

impl<F> Brain for FnBrain<F>
where
    F: FnMut(&ScreenState, &str) -> anyhow::Result<Action> + Send,
{
    fn think(&mut self, state: &ScreenState, task: &str) -> anyhow::Result<Action> {
        (self.think)(state, task)
    }
}

/// 按顺序回放固定动作，用完后返回 DONE
#[derive(Debug, Default, Clone)]
pub struct ScriptedBrain {
    script: VecDeque<Action>,
    /// 每个已派发动作是否成功
    results: Vec<bool>,
}

impl ScriptedBrain {
    pub fn new(actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            script: actions.into_iter().collect(),
            results: Vec::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    pub fn results(&self) -> &[bool] {
        &self.results
    }
}

impl Brain for ScriptedBrain {
    fn think(&mut self, _state: &ScreenState, _task: &str) -> anyhow::Result<Action> {
        Ok(self.script.pop_front().unwrap_or_else(Action::done))
    }

    fn on_action_result(&mut self, _action: &Action, outcome: Result<&StepOutcome, &AgentError>) {
        self.results.push(outcome.is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Size;

    fn empty_state() -> ScreenState {
        ScreenState::new(vec![], vec![], Size::new(100, 100)).unwrap()
    }

    #[test]
    fn test_scripted_brain_ends_with_done() {
        let mut brain = ScriptedBrain::new([Action::click_at(1.0, 1.0), Action::type_text("hi")]);
        let state = empty_state();
        assert_eq!(brain.think(&state, "t").unwrap(), Action::click_at(1.0, 1.0));
        assert_eq!(brain.think(&state, "t").unwrap(), Action::type_text("hi"));
        assert!(brain.think(&state, "t").unwrap().is_done());
        assert_eq!(brain.remaining(), 0);
    }

    #[test]
    fn test_fn_brain_sees_task() {
        let mut brain = FnBrain::new(|_state: &ScreenState, task: &str| {
            if task.is_empty() {
                anyhow::bail!("empty task");
            }
            Ok(Action::type_text(task))
        });
        let state = empty_state();
        assert_eq!(brain.think(&state, "abc").unwrap(), Action::type_text("abc"));
        assert!(brain.think(&state, "").is_err());
        assert!(brain.should_continue(1, &state));
    }

    #[tokio::test]
    async fn test_sync_adapter_forwards_hooks() {
        let mut adapter = SyncBrainAdapter::new(ScriptedBrain::new([Action::wait(0.0)]));
        let state = empty_state();
        let action = AsyncBrain::think(&mut adapter, &state, "t").await.unwrap();
        let err = AgentError::Cancelled;
        AsyncBrain::on_action_result(&mut adapter, &action, Err(&err)).await;
        assert_eq!(adapter.inner().results(), &[false]);
        assert!(AsyncBrain::should_continue(&mut adapter, 1, &state).await);
    }
}
