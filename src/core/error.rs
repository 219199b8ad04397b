//! 错误分类与终止原因
//!
//! 与 RecoveryEngine 配合：Validation / Resolution 属于永久错误，直接判定当前步失败；
//! Platform 错误按 RetryConfig 的谓词判定是否可重试，重试耗尽后汇总为 RetryExhausted。

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Action 校验失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    /// 需要位置的动作既没有 coordinate 也没有 element_label
    MissingTarget,
    /// 该动作类型必需的字段缺失（如 TYPE_TEXT 缺 text）
    MissingField,
    /// HOTKEY / KEY_PRESS 的 keys 为空
    EmptyKeys,
    /// 百分比坐标越界或坐标为 NaN
    InvalidCoordinate,
    InvalidDuration,
    /// DONE 等不可派发到平台的动作
    NotExecutable,
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingTarget => "MISSING_TARGET",
            Self::MissingField => "MISSING_FIELD",
            Self::EmptyKeys => "EMPTY_KEYS",
            Self::InvalidCoordinate => "INVALID_COORDINATE",
            Self::InvalidDuration => "INVALID_DURATION",
            Self::NotExecutable => "NOT_EXECUTABLE",
        }
    }
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 坐标 / 标签无法解析的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    UnknownLabel,
    /// 元素宽或高为 0
    DegenerateRect,
    /// 屏幕尺寸为 0，无法钳制坐标
    EmptyScreen,
}

impl ResolutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownLabel => "UNKNOWN_LABEL",
            Self::DegenerateRect => "DEGENERATE_RECT",
            Self::EmptyScreen => "EMPTY_SCREEN",
        }
    }
}

impl fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 平台层（截屏 / 鼠标 / 键盘）调用失败的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformErrorKind {
    Timeout,
    /// 系统忙，如输入队列被占用
    Busy,
    /// 显示服务暂不可用（锁屏、会话切换）
    Unavailable,
    PermissionDenied,
    Unsupported,
    InvalidInput,
    Other,
}

impl PlatformErrorKind {
    /// 默认可重试的瞬时错误
    pub const TRANSIENT: [PlatformErrorKind; 3] = [Self::Timeout, Self::Busy, Self::Unavailable];

    pub fn is_transient(&self) -> bool {
        Self::TRANSIENT.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Busy => "BUSY",
            Self::Unavailable => "UNAVAILABLE",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Unsupported => "UNSUPPORTED",
            Self::InvalidInput => "INVALID_INPUT",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for PlatformErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 平台调用错误
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub message: String,
}

impl PlatformError {
    pub fn new(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::Timeout, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::Busy, message)
    }
}

/// 元素检测 / 标注失败（外部组件产生，原样上抛）
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct DetectionError(pub String);

impl DetectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// 扁平化的错误种类，供重试谓词与历史记录使用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "category", content = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    Validation(ValidationKind),
    Resolution(ResolutionKind),
    Platform(PlatformErrorKind),
    Detection,
    RetryExhausted,
    Brain,
    BrainTimeout,
    Cancelled,
    Config,
}

impl ErrorKind {
    /// 永久错误：不进入 RetryExecutor
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Resolution(_))
    }

    /// 默认谓词：仅瞬时平台错误可重试
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Platform(kind) if kind.is_transient())
    }
}

/// 一次失败尝试的记录：第几次、什么错误、之后等待了多久（最后一次无等待）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
    pub delay: Option<Duration>,
}

/// 重试耗尽：按顺序携带全部失败记录
#[derive(Error, Debug, Clone, PartialEq)]
#[error("retry exhausted after {} attempt(s): {}", .failures.len(), last_message(.failures))]
pub struct RetryExhausted {
    pub failures: Vec<FailureRecord>,
}

fn last_message(failures: &[FailureRecord]) -> &str {
    failures.last().map(|f| f.message.as_str()).unwrap_or("no attempts")
}

impl RetryExhausted {
    /// 最后一次失败的种类
    pub fn last_kind(&self) -> Option<ErrorKind> {
        self.failures.last().map(|f| f.kind)
    }

    /// 实际等待过的退避时长（按顺序）
    pub fn delays(&self) -> Vec<Duration> {
        self.failures.iter().filter_map(|f| f.delay).collect()
    }
}

/// 控制核心的统一错误类型
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Validation error ({kind}): {detail}")]
    Validation { kind: ValidationKind, detail: String },

    #[error("Resolution error ({kind}): {detail}")]
    Resolution { kind: ResolutionKind, detail: String },

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    RetryExhausted(#[from] RetryExhausted),

    #[error("Brain error: {0}")]
    Brain(String),

    #[error("Brain timed out after {0:?}")]
    BrainTimeout(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    pub fn validation(kind: ValidationKind, detail: impl Into<String>) -> Self {
        Self::Validation {
            kind,
            detail: detail.into(),
        }
    }

    pub fn resolution(kind: ResolutionKind, detail: impl Into<String>) -> Self {
        Self::Resolution {
            kind,
            detail: detail.into(),
        }
    }

    /// 外部 Brain 的错误链压平为一条消息
    pub fn brain(err: anyhow::Error) -> Self {
        Self::Brain(format!("{:#}", err))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { kind, .. } => ErrorKind::Validation(*kind),
            Self::Resolution { kind, .. } => ErrorKind::Resolution(*kind),
            Self::Platform(e) => ErrorKind::Platform(e.kind),
            Self::Detection(_) => ErrorKind::Detection,
            Self::RetryExhausted(_) => ErrorKind::RetryExhausted,
            Self::Brain(_) => ErrorKind::Brain,
            Self::BrainTimeout(_) => ErrorKind::BrainTimeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

/// Agent 循环结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    MaxSteps,
    BrainDone,
    FatalError,
    Cancelled,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MaxSteps => "MAX_STEPS",
            Self::BrainDone => "BRAIN_DONE",
            Self::FatalError => "FATAL_ERROR",
            Self::Cancelled => "CANCELLED",
        })
    }
}

/// 终止错误：携带原因、已执行步数与最后一个错误
#[derive(Error, Debug, Clone)]
#[error("agent terminated ({cause}) after {steps} step(s)")]
pub struct AgentTermination {
    pub cause: TerminationCause,
    pub steps: usize,
    #[source]
    pub last_error: Option<AgentError>,
}
