//! 主控循环集成测试：MockPlatform + 脚本 / 闭包 Brain

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use ccf::agent::{AgentConfig, AsyncComputerAgent, ComputerAgent};
    use ccf::brain::{AsyncBrain, Brain, FnBrain, ScriptedBrain, SyncBrainAdapter};
    use ccf::core::{
        Action, AgentError, AgentStatus, BackoffKind, DetectionError, MouseButton, Pixel,
        PlatformErrorKind, Rect, ResolutionKind, RetryConfig, ScreenElement, ScreenState, Size,
        StepOutcome, TerminationCause,
    };
    use ccf::history::DebugSession;
    use ccf::observability::{LogEvent, MemoryActionLog};
    use ccf::platform::{MockPlatform, PlatformCall};
    use ccf::vision::{FnDetector, LabelMapAnnotator};
    use tokio_util::sync::CancellationToken;

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(
            BackoffKind::Constant,
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
    }

    fn config(max_steps: usize) -> AgentConfig {
        AgentConfig::immediate(max_steps).with_retry(fast_retry())
    }

    fn always_click() -> FnBrain<impl FnMut(&ScreenState, &str) -> anyhow::Result<Action> + Send> {
        FnBrain::new(|_: &ScreenState, _: &str| Ok(Action::click_at(100.0, 100.0)))
    }

    fn one_button() -> Arc<FnDetector> {
        Arc::new(FnDetector::new(|_: &[u8]| -> Result<Vec<ScreenElement>, DetectionError> {
            Ok(vec![ScreenElement::new("~0", Rect::new(10, 10, 20, 20)).with_text("OK")])
        }))
    }

    /// 第一个动作执行完后触发取消
    struct CancelAfterFirst {
        token: CancellationToken,
    }

    impl Brain for CancelAfterFirst {
        fn think(&mut self, _state: &ScreenState, _task: &str) -> anyhow::Result<Action> {
            Ok(Action::click_at(1.0, 1.0))
        }

        fn on_action_result(&mut self, _action: &Action, _outcome: Result<&StepOutcome, &AgentError>) {
            self.token.cancel();
        }
    }

    #[async_trait]
    impl AsyncBrain for CancelAfterFirst {
        async fn think(&mut self, _state: &ScreenState, _task: &str) -> anyhow::Result<Action> {
            Ok(Action::click_at(1.0, 1.0))
        }

        async fn on_action_result(
            &mut self,
            _action: &Action,
            _outcome: Result<&StepOutcome, &AgentError>,
        ) {
            self.token.cancel();
        }
    }

    #[test]
    fn test_max_steps_budget() {
        let platform = Arc::new(MockPlatform::default());
        let mut agent = ComputerAgent::new(always_click(), platform.clone(), config(3)).unwrap();

        let run = agent.run("keep clicking");
        assert_eq!(run.status, AgentStatus::MaxSteps);
        assert_eq!(run.steps, 3);
        assert_eq!(run.history.as_ref().map(Vec::len), Some(3));
        assert_eq!(run.termination_cause(), Some(TerminationCause::MaxSteps));
        assert_eq!(platform.input_calls().len(), 3);
        assert_eq!(platform.screenshot_count(), 3);

        let indices: Vec<usize> = agent.history().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(agent.history().iter().all(|r| r.success));
    }

    #[test]
    fn test_click_by_label_hits_element_center() {
        let platform = Arc::new(MockPlatform::default());
        let brain = ScriptedBrain::new([Action::click_label("~0")]);
        let mut agent = ComputerAgent::new(brain, platform.clone(), config(5))
            .unwrap()
            .with_detector(one_button())
            .with_annotator(Arc::new(LabelMapAnnotator));

        let run = agent.run("press OK");
        assert!(run.is_success());
        assert_eq!(
            platform.input_calls(),
            vec![PlatformCall::MouseClick {
                at: Pixel::new(20, 20),
                button: MouseButton::Left,
                clicks: 1,
            }]
        );
        assert_eq!(agent.history()[0].resolved, Some(Pixel::new(20, 20)));
    }

    #[test]
    fn test_unknown_label_fails_without_platform_input() {
        let platform = Arc::new(MockPlatform::default());
        let brain = ScriptedBrain::new([Action::click_label("~7")]);
        let mut agent = ComputerAgent::new(brain, platform.clone(), config(5))
            .unwrap()
            .with_detector(one_button());

        let run = agent.run("press missing");
        assert_eq!(run.status, AgentStatus::Failed);
        assert!(matches!(
            run.last_error,
            Some(AgentError::Resolution {
                kind: ResolutionKind::UnknownLabel,
                ..
            })
        ));
        assert!(platform.input_calls().is_empty());
        assert_eq!(run.steps, 0);

        let history = run.history.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert!(agent.brain().results().iter().all(|ok| !ok));
    }

    #[test]
    fn test_cancel_after_first_step() {
        let token = CancellationToken::new();
        let brain = CancelAfterFirst {
            token: token.clone(),
        };
        let platform = Arc::new(MockPlatform::default());
        let mut agent = ComputerAgent::new(brain, platform.clone(), config(5))
            .unwrap()
            .with_cancel_token(token);

        let run = agent.run("one click then stop");
        assert_eq!(run.status, AgentStatus::Cancelled);
        assert_eq!(run.steps, 1);
        assert_eq!(run.history.as_ref().map(Vec::len), Some(1));
        assert_eq!(platform.input_calls().len(), 1);
        assert_eq!(platform.screenshot_count(), 1);

        let termination = run.into_result().unwrap_err();
        assert_eq!(termination.cause, TerminationCause::Cancelled);
    }

    #[test]
    fn test_retry_exhaustion_fails_run() {
        let platform = Arc::new(MockPlatform::default());
        platform.fail_next_inputs(10, PlatformErrorKind::Busy);
        let mut agent = ComputerAgent::new(always_click(), platform.clone(), config(5)).unwrap();

        let run = agent.run("click on a busy desktop");
        assert_eq!(run.status, AgentStatus::Failed);
        match &run.last_error {
            Some(AgentError::RetryExhausted(e)) => assert_eq!(e.failures.len(), 3),
            other => panic!("Expected RetryExhausted, got {other:?}"),
        }
        assert_eq!(platform.input_calls().len(), 3);
        let history = run.history.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].attempts, 3);
        assert_eq!(agent.retry_stats().exhausted, 1);
    }

    #[test]
    fn test_transient_failure_recovers_within_step() {
        let platform = Arc::new(MockPlatform::default());
        platform.fail_next_inputs(2, PlatformErrorKind::Timeout);
        let brain = ScriptedBrain::new([Action::type_text("hello")]);
        let mut agent = ComputerAgent::new(brain, platform.clone(), config(5)).unwrap();

        let run = agent.run("type");
        assert!(run.is_success());
        assert_eq!(run.steps, 1);
        assert_eq!(agent.history()[0].attempts, 3);
        assert_eq!(platform.input_calls().len(), 3);
    }

    #[test]
    fn test_should_continue_false_completes() {
        struct Reluctant;
        impl Brain for Reluctant {
            fn think(&mut self, _: &ScreenState, _: &str) -> anyhow::Result<Action> {
                Ok(Action::click_at(1.0, 1.0))
            }
            fn should_continue(&mut self, _step: usize, _state: &ScreenState) -> bool {
                false
            }
        }
        let platform = Arc::new(MockPlatform::default());
        let mut agent = ComputerAgent::new(Reluctant, platform.clone(), config(5)).unwrap();
        let run = agent.run("nothing to do");
        assert_eq!(run.status, AgentStatus::Completed);
        assert_eq!(run.steps, 0);
        assert!(platform.input_calls().is_empty());
    }

    #[test]
    fn test_action_log_receives_events() {
        let log = Arc::new(MemoryActionLog::new());
        let platform = Arc::new(MockPlatform::new(Size::new(800, 600)));
        let mut agent = ComputerAgent::new(always_click(), platform, config(2))
            .unwrap()
            .with_action_log(log.clone());
        agent.run("log it");

        let events = log.events();
        assert!(matches!(events.first(), Some(LogEvent::StepStarted(1))));
        assert!(matches!(
            events.last(),
            Some(LogEvent::RunFinished(AgentStatus::MaxSteps, 2))
        ));
        let audits = log.audits();
        assert_eq!(audits.len(), 2);
        assert!(audits.iter().all(|a| a.ok && a.target == Some(Pixel::new(100, 100))));
    }

    #[test]
    fn test_each_run_starts_from_init() {
        let platform = Arc::new(MockPlatform::default());
        let mut agent = ComputerAgent::new(always_click(), platform.clone(), config(2)).unwrap();
        assert_eq!(agent.run("first").steps, 2);
        let second = agent.run("second");
        assert_eq!(second.steps, 2);
        assert_eq!(agent.history().len(), 2);
        assert_eq!(platform.input_calls().len(), 4);
    }

    #[test]
    fn test_debug_session_round_trip_of_real_run() {
        let platform = Arc::new(MockPlatform::default());
        let brain = ScriptedBrain::new([
            Action::click_at(5.0, 5.0),
            Action::hotkey(["ctrl", "s"]),
        ]);
        let mut agent = ComputerAgent::new(brain, platform, config(5)).unwrap();

        let mut session = DebugSession::start("save the file");
        let run = agent.run("save the file");
        session.finish(&run);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        session.save(&path).unwrap();
        let loaded = DebugSession::load(&path).unwrap();
        assert_eq!(loaded.status, AgentStatus::Completed);
        assert_eq!(loaded.frames.len(), 2);
        assert_eq!(loaded.frames[1].action, Action::hotkey(["ctrl", "s"]));
    }

    #[tokio::test]
    async fn test_async_max_steps_budget() {
        let platform = Arc::new(MockPlatform::default());
        let brain = SyncBrainAdapter::new(always_click());
        let mut agent = AsyncComputerAgent::new(brain, platform.clone(), config(3)).unwrap();

        let run = agent.run("keep clicking").await;
        assert_eq!(run.status, AgentStatus::MaxSteps);
        assert_eq!(run.steps, 3);
        assert_eq!(agent.history().len(), 3);
        assert_eq!(platform.input_calls().len(), 3);
        assert_eq!(agent.current_step(), 3);
        assert!(!agent.is_running());
    }

    #[tokio::test]
    async fn test_async_cancel_after_first_step() {
        let token = CancellationToken::new();
        let brain = CancelAfterFirst {
            token: token.clone(),
        };
        let platform = Arc::new(MockPlatform::default());
        let mut agent = AsyncComputerAgent::new(brain, platform.clone(), config(5))
            .unwrap()
            .with_cancel_token(token);

        let run = agent.run("one click then stop").await;
        assert_eq!(run.status, AgentStatus::Cancelled);
        assert_eq!(run.steps, 1);
        assert_eq!(agent.history().len(), 1);
        assert_eq!(platform.input_calls().len(), 1);
        assert_eq!(platform.screenshot_count(), 1);
    }

    #[tokio::test]
    async fn test_async_cancel_during_action_delay() {
        let platform = Arc::new(MockPlatform::default());
        let mut cfg = config(5);
        cfg.action_delay = Duration::from_secs(30);
        let mut agent =
            AsyncComputerAgent::new(SyncBrainAdapter::new(always_click()), platform.clone(), cfg)
                .unwrap();
        let handle = agent.handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let run = agent.run("click then idle").await;
        assert_eq!(run.status, AgentStatus::Cancelled);
        assert_eq!(run.steps, 1);
        assert_eq!(platform.input_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_async_label_resolution_and_failure() {
        let platform = Arc::new(MockPlatform::default());
        let brain = SyncBrainAdapter::new(ScriptedBrain::new([
            Action::click_label("~0"),
            Action::click_label("~5"),
        ]));
        let mut agent = AsyncComputerAgent::new(brain, platform.clone(), config(5))
            .unwrap()
            .with_detector(one_button())
            .with_annotator(Arc::new(LabelMapAnnotator));

        let run = agent.run("click twice").await;
        assert_eq!(run.status, AgentStatus::Failed);
        assert_eq!(run.steps, 1);
        assert_eq!(platform.input_calls().len(), 1);
        assert_eq!(agent.history()[0].resolved, Some(Pixel::new(20, 20)));
        assert!(!agent.history()[1].success);
    }
}
