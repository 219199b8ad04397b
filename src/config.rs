//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CCF__*` 覆盖（双下划线表示嵌套，如 `CCF__AGENT__MAX_STEPS=20`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::agent::AgentConfig;
use crate::core::{AgentError, BackoffKind, PlatformErrorKind, RetryConfig};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub retry: RetrySection,
    pub logging: LoggingSection,
}

/// [agent] 段：循环节奏与步数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub action_delay_ms: u64,
    pub screenshot_delay_ms: u64,
    pub max_steps: usize,
    pub annotate_screenshot: bool,
    pub record_history: bool,
    /// 异步循环 think / 派发超时（秒），0 表示不限
    pub step_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            action_delay_ms: 1000,
            screenshot_delay_ms: 500,
            max_steps: 100,
            annotate_screenshot: true,
            record_history: true,
            step_timeout_secs: 60,
        }
    }
}

/// [retry] 段：设置 profile 时以预置配置的数值为准
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// standard / aggressive / conservative
    pub profile: Option<String>,
    pub backoff: BackoffKind,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    /// 可重试的平台错误种类
    pub retry_on: Vec<PlatformErrorKind>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            profile: None,
            backoff: BackoffKind::Exponential,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            jitter: 0.1,
            retry_on: PlatformErrorKind::TRANSIENT.to_vec(),
        }
    }
}

impl RetrySection {
    pub fn retry_config(&self) -> Result<RetryConfig, AgentError> {
        let base = match &self.profile {
            Some(name) => RetryConfig::profile(name)
                .ok_or_else(|| AgentError::Config(format!("unknown retry profile '{name}'")))?,
            None => RetryConfig::new(
                self.backoff,
                self.max_attempts,
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            ),
        };
        let config = base
            .with_backoff(self.backoff)
            .with_jitter(self.jitter)
            .retry_on(self.retry_on.clone());
        config.validate()?;
        Ok(config)
    }
}

/// [logging] 段：tracing 过滤表达式与输出格式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// EnvFilter 语法，如 "info,ccf=debug"；RUST_LOG 优先
    pub filter: String,
    /// true 时输出 JSON 行
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// 组装并校验 AgentConfig
    pub fn agent_config(&self) -> Result<AgentConfig, AgentError> {
        let agent = &self.agent;
        let config = AgentConfig {
            action_delay: Duration::from_millis(agent.action_delay_ms),
            screenshot_delay: Duration::from_millis(agent.screenshot_delay_ms),
            max_steps: agent.max_steps,
            annotate_screenshot: agent.annotate_screenshot,
            record_history: agent.record_history,
            step_timeout: (agent.step_timeout_secs > 0)
                .then(|| Duration::from_secs(agent.step_timeout_secs)),
            retry: self.retry.retry_config()?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// 从 config 目录加载配置，环境变量 CCF__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CCF__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CCF")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
