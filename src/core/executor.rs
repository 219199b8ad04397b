//! 动作执行器：校验 → 坐标解析 → 平台派发（包裹在 RetryExecutor 中）
//!
//! 校验与解析失败属于永久错误，直接返回且不产生任何平台调用；
//! 只有派发阶段的 PlatformError 会交给重试谓词分类。每次执行输出一条审计记录。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::action::{Action, ActionKind, MouseButton, Target};
use crate::core::error::{
    AgentError, FailureRecord, PlatformError, PlatformErrorKind, ValidationKind,
};
use crate::core::resolver::CoordinateResolver;
use crate::core::retry::{Retried, RetryConfig, RetryExecutor, RetryStats};
use crate::core::types::{Pixel, ScreenState};
use crate::observability::{ActionAudit, ActionLog, TracingActionLog};
use crate::platform::PlatformController;

/// 解析完成、可直接交给平台的调用
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Move {
        to: Pixel,
        duration: Duration,
    },
    Click {
        at: Pixel,
        button: MouseButton,
        clicks: u32,
    },
    Drag {
        from: Pixel,
        to: Pixel,
        button: MouseButton,
        duration: Duration,
    },
    Scroll {
        at: Option<Pixel>,
        /// 已按方向取符号
        amount: i32,
        horizontal: bool,
    },
    TypeText(String),
    KeyPress(Vec<String>),
    KeyDown(String),
    KeyUp(String),
    Hotkey(Vec<String>),
    Wait(Duration),
}

impl Dispatch {
    /// 主目标像素（DRAG 为起点）
    pub fn target(&self) -> Option<Pixel> {
        match self {
            Self::Move { to, .. } => Some(*to),
            Self::Click { at, .. } => Some(*at),
            Self::Drag { from, .. } => Some(*from),
            Self::Scroll { at, .. } => *at,
            _ => None,
        }
    }

    pub fn end(&self) -> Option<Pixel> {
        match self {
            Self::Drag { to, .. } => Some(*to),
            _ => None,
        }
    }

    /// 执行一次平台调用；WAIT 在当前线程休眠
    pub fn apply(&self, platform: &dyn PlatformController) -> Result<(), PlatformError> {
        match self {
            Self::Move { to, duration } => platform.mouse_move(*to, *duration),
            Self::Click { at, button, clicks } => platform.mouse_click(*at, *button, *clicks),
            Self::Drag {
                from,
                to,
                button,
                duration,
            } => platform.mouse_drag(*from, *to, *button, *duration),
            Self::Scroll {
                at,
                amount,
                horizontal,
            } => platform.mouse_scroll(*amount, *at, *horizontal),
            Self::TypeText(text) => platform.type_text(text),
            Self::KeyPress(keys) => {
                for key in keys {
                    platform.key_press(key)?;
                }
                Ok(())
            }
            Self::KeyDown(key) => platform.key_down(key),
            Self::KeyUp(key) => platform.key_up(key),
            Self::Hotkey(keys) => platform.hotkey(keys),
            Self::Wait(duration) => {
                std::thread::sleep(*duration);
                Ok(())
            }
        }
    }
}

/// 单步执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub action: ActionKind,
    pub target: Option<Pixel>,
    pub end: Option<Pixel>,
    /// 实际尝试次数（含成功那次）
    pub attempts: u32,
    /// 成功前的失败尝试
    pub failures: Vec<FailureRecord>,
    pub latency: Duration,
}

/// 动作执行器
pub struct ActionExecutor {
    resolver: CoordinateResolver,
    retry: RetryExecutor,
    log: Arc<dyn ActionLog>,
}

impl ActionExecutor {
    pub fn new(retry_config: RetryConfig) -> Self {
        Self {
            resolver: CoordinateResolver::new(),
            retry: RetryExecutor::new(retry_config),
            log: Arc::new(TracingActionLog),
        }
    }

    pub fn with_action_log(mut self, log: Arc<dyn ActionLog>) -> Self {
        self.log = log;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        self.retry.config()
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.retry.stats()
    }

    /// 校验并解析动作；不产生任何平台调用
    pub fn prepare(&self, action: &Action, state: &ScreenState) -> Result<Dispatch, AgentError> {
        validate(action)?;
        let resolve = |target: &Target| self.resolver.resolve(target, state, state.screen_size());

        let dispatch = match action {
            Action::Click {
                target,
                button,
                clicks,
            } => Dispatch::Click {
                at: resolve(target)?,
                button: *button,
                clicks: *clicks,
            },
            Action::DoubleClick { target, button } => Dispatch::Click {
                at: resolve(target)?,
                button: *button,
                clicks: 2,
            },
            Action::RightClick { target } => Dispatch::Click {
                at: resolve(target)?,
                button: MouseButton::Right,
                clicks: 1,
            },
            Action::MouseMove { target, duration } => Dispatch::Move {
                to: resolve(target)?,
                duration: seconds(*duration)?,
            },
            Action::Drag {
                from,
                to,
                button,
                duration,
            } => Dispatch::Drag {
                from: resolve(from)?,
                to: resolve(to)?,
                button: *button,
                duration: seconds(*duration)?,
            },
            Action::Scroll {
                target,
                amount,
                direction,
            } => Dispatch::Scroll {
                at: if target.is_empty() {
                    None
                } else {
                    Some(resolve(target)?)
                },
                amount: direction.signed(*amount),
                horizontal: direction.is_horizontal(),
            },
            Action::TypeText { text } => Dispatch::TypeText(text.clone()),
            Action::KeyPress { keys } => Dispatch::KeyPress(keys.clone()),
            Action::KeyDown { key } => Dispatch::KeyDown(key.clone()),
            Action::KeyUp { key } => Dispatch::KeyUp(key.clone()),
            Action::Hotkey { keys } => Dispatch::Hotkey(keys.clone()),
            Action::Wait { duration } => Dispatch::Wait(seconds(*duration)?),
            Action::Done { .. } => {
                return Err(AgentError::validation(
                    ValidationKind::NotExecutable,
                    "done is a termination signal, not a platform action",
                ))
            }
        };
        Ok(dispatch)
    }

    /// 阻塞执行：退避期间阻塞当前线程
    pub fn execute(
        &self,
        action: &Action,
        state: &ScreenState,
        platform: &dyn PlatformController,
    ) -> Result<StepOutcome, AgentError> {
        let started = Instant::now();
        let dispatch = self
            .prepare(action, state)
            .map_err(|e| self.audit_failure(action.kind(), None, started, e))?;

        match self.retry.run(|_| dispatch.apply(platform).map_err(AgentError::from)) {
            Ok(retried) => Ok(self.succeeded(action.kind(), &dispatch, retried, started)),
            Err(e) => Err(self.audit_failure(action.kind(), dispatch.target(), started, e)),
        }
    }

    /// 挂起执行：平台调用在阻塞线程池中进行，可选派发超时（视为可重试的 TIMEOUT）
    ///
    /// 已派发的调用无法中途取消；超时后先等该调用结束再返回 TIMEOUT，
    /// 同一时刻最多只有一个平台调用在进行。
    pub async fn execute_async(
        &self,
        action: &Action,
        state: &ScreenState,
        platform: Arc<dyn PlatformController>,
        dispatch_timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, AgentError> {
        let started = Instant::now();
        let kind = action.kind();
        let dispatch = self
            .prepare(action, state)
            .map_err(|e| self.audit_failure(kind, None, started, e))?;

        if let Dispatch::Wait(duration) = dispatch {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(duration) => {}
            }
            let retried = Retried {
                value: (),
                attempts: 1,
                failures: Vec::new(),
            };
            return Ok(self.succeeded(kind, &dispatch, retried, started));
        }

        let result = self
            .retry
            .run_async(
                |attempt| {
                    let platform = Arc::clone(&platform);
                    let dispatch = dispatch.clone();
                    async move {
                        let mut call =
                            tokio::task::spawn_blocking(move || dispatch.apply(platform.as_ref()));
                        let joined = match dispatch_timeout {
                            Some(limit) => match tokio::time::timeout(limit, &mut call).await {
                                Ok(joined) => joined,
                                Err(_) => {
                                    // 已派发的调用无法中断：等它真正结束后才进入退避或下一次尝试
                                    let _ = call.await;
                                    return Err(AgentError::from(PlatformError::timeout(format!(
                                        "dispatch exceeded {limit:?} on attempt {attempt}"
                                    ))));
                                }
                            },
                            None => call.await,
                        };
                        joined
                            .map_err(|e| {
                                PlatformError::new(
                                    PlatformErrorKind::Other,
                                    format!("platform call aborted: {e}"),
                                )
                            })?
                            .map_err(AgentError::from)
                    }
                },
                cancel,
            )
            .await;

        match result {
            Ok(retried) => Ok(self.succeeded(kind, &dispatch, retried, started)),
            Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
            Err(e) => Err(self.audit_failure(kind, dispatch.target(), started, e)),
        }
    }

    fn succeeded(
        &self,
        kind: ActionKind,
        dispatch: &Dispatch,
        retried: Retried<()>,
        started: Instant,
    ) -> StepOutcome {
        let latency = started.elapsed();
        self.log.action(&ActionAudit {
            action: kind,
            target: dispatch.target(),
            ok: true,
            attempts: retried.attempts,
            duration_ms: latency.as_millis() as u64,
            error: None,
        });
        StepOutcome {
            action: kind,
            target: dispatch.target(),
            end: dispatch.end(),
            attempts: retried.attempts,
            failures: retried.failures,
            latency,
        }
    }

    fn audit_failure(
        &self,
        kind: ActionKind,
        target: Option<Pixel>,
        started: Instant,
        err: AgentError,
    ) -> AgentError {
        let attempts = match &err {
            AgentError::RetryExhausted(e) => e.failures.len() as u32,
            _ => 0,
        };
        self.log.action(&ActionAudit {
            action: kind,
            target,
            ok: false,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            error: Some(err.to_string()),
        });
        err
    }
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// 各动作类型的必需字段
fn validate(action: &Action) -> Result<(), AgentError> {
    let require_target = |target: &Target, what: &str| {
        if target.is_empty() {
            Err(AgentError::validation(
                ValidationKind::MissingTarget,
                format!("{} requires a coordinate or element_label for {what}", action.kind().as_str()),
            ))
        } else {
            Ok(())
        }
    };
    let require_keys = |keys: &[String]| {
        if keys.is_empty() || keys.iter().any(|k| k.trim().is_empty()) {
            Err(AgentError::validation(
                ValidationKind::EmptyKeys,
                format!("{} requires non-empty keys", action.kind().as_str()),
            ))
        } else {
            Ok(())
        }
    };

    match action {
        Action::Click { target, clicks, .. } => {
            require_target(target, "the click")?;
            if *clicks == 0 {
                return Err(AgentError::validation(
                    ValidationKind::MissingField,
                    "click requires clicks >= 1",
                ));
            }
            Ok(())
        }
        Action::DoubleClick { target, .. } | Action::RightClick { target } => {
            require_target(target, "the click")
        }
        Action::MouseMove { target, .. } => require_target(target, "the move"),
        Action::Drag { from, to, .. } => {
            require_target(from, "the start point")?;
            require_target(to, "the end point")
        }
        Action::Scroll { .. } => Ok(()),
        Action::TypeText { text } => {
            if text.is_empty() {
                Err(AgentError::validation(
                    ValidationKind::MissingField,
                    "type_text requires non-empty text",
                ))
            } else {
                Ok(())
            }
        }
        Action::KeyPress { keys } | Action::Hotkey { keys } => require_keys(keys),
        Action::KeyDown { key } | Action::KeyUp { key } => require_keys(std::slice::from_ref(key)),
        Action::Wait { .. } | Action::Done { .. } => Ok(()),
    }
}

fn seconds(value: f64) -> Result<Duration, AgentError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        AgentError::validation(
            ValidationKind::InvalidDuration,
            format!("duration {value} is not a finite, non-negative number of seconds"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::ScrollDirection;
    use crate::core::retry::BackoffKind;
    use crate::core::types::{Point, Rect, ScreenElement, Size};
    use crate::observability::MemoryActionLog;
    use crate::platform::{MockPlatform, PlatformCall};

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(
            BackoffKind::Constant,
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
    }

    fn state() -> ScreenState {
        ScreenState::new(
            vec![],
            vec![
                ScreenElement::new("~0", Rect::new(10, 10, 20, 20)),
                ScreenElement::new("~1", Rect::new(100, 200, 40, 10)),
            ],
            Size::new(1000, 500),
        )
        .unwrap()
    }

    #[test]
    fn test_click_by_label_dispatches_center() {
        let platform = MockPlatform::new(Size::new(1000, 500));
        let executor = ActionExecutor::new(fast_retry());
        let outcome = executor
            .execute(&Action::click_label("~0"), &state(), &platform)
            .unwrap();
        assert_eq!(outcome.target, Some(Pixel::new(20, 20)));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(
            platform.input_calls(),
            vec![PlatformCall::MouseClick {
                at: Pixel::new(20, 20),
                button: MouseButton::Left,
                clicks: 1
            }]
        );
    }

    #[test]
    fn test_unknown_label_makes_no_platform_call() {
        let platform = MockPlatform::default();
        let log = Arc::new(MemoryActionLog::new());
        let executor = ActionExecutor::new(fast_retry()).with_action_log(log.clone());
        let err = executor
            .execute(&Action::click_label("~99"), &state(), &platform)
            .unwrap_err();
        assert!(matches!(err, AgentError::Resolution { .. }));
        assert!(platform.calls().is_empty());
        assert_eq!(executor.retry_stats().total_attempts, 0);

        let audits = log.audits();
        assert_eq!(audits.len(), 1);
        assert!(!audits[0].ok);
    }

    #[test]
    fn test_validation_failures() {
        let executor = ActionExecutor::new(fast_retry());
        let s = state();
        let cases = [
            (Action::click(Target::default()), ValidationKind::MissingTarget),
            (Action::hotkey(Vec::<String>::new()), ValidationKind::EmptyKeys),
            (Action::KeyPress { keys: vec!["".into()] }, ValidationKind::EmptyKeys),
            (Action::type_text(""), ValidationKind::MissingField),
            (Action::wait(-1.0), ValidationKind::InvalidDuration),
            (Action::done(), ValidationKind::NotExecutable),
            (
                Action::Drag {
                    from: Target::label("~0"),
                    to: Target::default(),
                    button: MouseButton::Left,
                    duration: 0.0,
                },
                ValidationKind::MissingTarget,
            ),
        ];
        for (action, expected) in cases {
            match executor.prepare(&action, &s) {
                Err(AgentError::Validation { kind, .. }) => assert_eq!(kind, expected, "{action:?}"),
                other => panic!("Expected Validation for {action:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_prepare_variants() {
        let executor = ActionExecutor::new(fast_retry());
        let s = state();

        let drag = Action::Drag {
            from: Target::label("~0"),
            to: Target::point(Point::percentage(0.5, 0.5)),
            button: MouseButton::Left,
            duration: 0.25,
        };
        assert_eq!(
            executor.prepare(&drag, &s).unwrap(),
            Dispatch::Drag {
                from: Pixel::new(20, 20),
                to: Pixel::new(500, 250),
                button: MouseButton::Left,
                duration: Duration::from_millis(250),
            }
        );

        let scroll = Action::Scroll {
            target: Target::default(),
            amount: 3,
            direction: ScrollDirection::Down,
        };
        assert_eq!(
            executor.prepare(&scroll, &s).unwrap(),
            Dispatch::Scroll {
                at: None,
                amount: -3,
                horizontal: false
            }
        );

        let right = Action::RightClick {
            target: Target::label("~1"),
        };
        assert_eq!(
            executor.prepare(&right, &s).unwrap(),
            Dispatch::Click {
                at: Pixel::new(120, 205),
                button: MouseButton::Right,
                clicks: 1
            }
        );
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let platform = MockPlatform::default();
        platform.fail_next_inputs(2, PlatformErrorKind::Busy);
        let executor = ActionExecutor::new(fast_retry());
        let outcome = executor
            .execute(&Action::type_text("hello"), &state(), &platform)
            .unwrap();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(platform.input_calls().len(), 3);
    }

    #[test]
    fn test_permanent_platform_failure_is_not_retried() {
        let platform = MockPlatform::default();
        platform.fail_next_inputs(1, PlatformErrorKind::PermissionDenied);
        let executor = ActionExecutor::new(fast_retry());
        let err = executor
            .execute(&Action::hotkey(["ctrl", "c"]), &state(), &platform)
            .unwrap_err();
        assert!(matches!(err, AgentError::RetryExhausted(ref e) if e.failures.len() == 1));
        assert_eq!(platform.input_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_async_retries_and_succeeds() {
        let platform = Arc::new(MockPlatform::default());
        platform.fail_next_inputs(1, PlatformErrorKind::Timeout);
        let executor = ActionExecutor::new(fast_retry());
        let outcome = executor
            .execute_async(
                &Action::click_label("~1"),
                &state(),
                platform.clone(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(platform.input_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_execute_async_dispatch_timeout_is_retryable() {
        let platform = Arc::new(MockPlatform::default().with_latency(Duration::from_millis(200)));
        let executor = ActionExecutor::new(RetryConfig::new(
            BackoffKind::Constant,
            2,
            Duration::from_millis(1),
            Duration::from_millis(1),
        ));
        let err = executor
            .execute_async(
                &Action::type_text("slow"),
                &state(),
                platform,
                Some(Duration::from_millis(10)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            AgentError::RetryExhausted(e) => {
                assert_eq!(e.failures.len(), 2);
                assert!(e
                    .failures
                    .iter()
                    .all(|f| f.kind == crate::core::error::ErrorKind::Platform(PlatformErrorKind::Timeout)));
            }
            other => panic!("Expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_async_timeout_never_overlaps_inputs() {
        let platform = Arc::new(MockPlatform::default().with_latency(Duration::from_millis(150)));
        let executor = ActionExecutor::new(RetryConfig::new(
            BackoffKind::Constant,
            3,
            Duration::from_millis(1),
            Duration::from_millis(1),
        ));
        let err = executor
            .execute_async(
                &Action::click_label("~0"),
                &state(),
                platform.clone(),
                Some(Duration::from_millis(20)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::RetryExhausted(_)));
        assert_eq!(platform.input_calls().len(), 3);
        assert_eq!(platform.max_concurrent_inputs(), 1);
    }

    #[test]
    fn test_scroll_extreme_amount_does_not_overflow() {
        let executor = ActionExecutor::new(fast_retry());
        let dispatch = executor
            .prepare(
                &Action::Scroll {
                    target: Target::default(),
                    amount: i32::MIN,
                    direction: ScrollDirection::Down,
                },
                &state(),
            )
            .unwrap();
        match dispatch {
            Dispatch::Scroll { amount, .. } => assert_eq!(amount, i32::MAX),
            other => panic!("Expected Scroll, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_async_wait_honours_cancel() {
        let platform = Arc::new(MockPlatform::default());
        let executor = ActionExecutor::new(fast_retry());
        let token = CancellationToken::new();
        token.cancel();
        let err = executor
            .execute_async(&Action::wait(30.0), &state(), platform, None, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }
}
