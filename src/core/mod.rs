//! 控制核心：数据模型、错误分类、坐标解析、重试引擎、动作执行与状态机

pub mod action;
pub mod error;
pub mod executor;
pub mod recovery;
pub mod resolver;
pub mod retry;
pub mod state;
pub mod types;

pub use action::{Action, ActionKind, ActionRequest, MouseButton, ScrollDirection, Target};
pub use error::{
    AgentError, AgentTermination, DetectionError, ErrorKind, FailureRecord, PlatformError,
    PlatformErrorKind, ResolutionKind, RetryExhausted, TerminationCause, ValidationKind,
};
pub use executor::{ActionExecutor, Dispatch, StepOutcome};
pub use recovery::{RecoveryAction, RecoveryEngine};
pub use resolver::CoordinateResolver;
pub use retry::{BackoffKind, Retried, RetryConfig, RetryExecutor, RetryPredicate, RetryStats};
pub use state::AgentStatus;
pub use types::{CoordinateKind, Pixel, Point, Rect, ScreenElement, ScreenState, Size};
