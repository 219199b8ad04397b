//! 可观测性：tracing 订阅器初始化与动作审计
//!
//! `init` 在进程启动时调用一次（重复调用为空操作），`shutdown` 在退出前冲刷输出。
//! 执行层与循环不直接写全局日志器，而是通过注入的 `ActionLog` 上报事件。

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSection;
use crate::core::{ActionKind, AgentStatus, Pixel};

static INIT: OnceLock<()> = OnceLock::new();
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// 安装 EnvFilter + fmt 层；`RUST_LOG` 优先于配置中的 filter
pub fn init(logging: &LoggingSection) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&logging.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);
        // 宿主程序可能已安装订阅器，此时保留对方的
        let installed = if logging.json {
            registry.with(fmt::layer().json()).try_init()
        } else {
            registry.with(fmt::layer()).try_init()
        };
        if installed.is_err() {
            tracing::debug!("global subscriber already set, keeping it");
        }
    });
}

/// 冲刷 stdout / stderr；只生效一次
pub fn shutdown() {
    if SHUTDOWN.swap(true, Ordering::SeqCst) {
        return;
    }
    tracing::info!("observability shutdown");
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

/// 单个动作的审计记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionAudit {
    pub action: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Pixel>,
    pub ok: bool,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 注入式日志能力：执行器与 Agent 循环通过它上报事件
pub trait ActionLog: Send + Sync {
    fn step_started(&self, _step: usize, _max_steps: usize) {}

    fn action(&self, audit: &ActionAudit);

    fn run_finished(&self, _status: AgentStatus, _steps: usize) {}
}

/// 默认实现：每个动作输出一条 JSON 审计日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActionLog;

impl ActionLog for TracingActionLog {
    fn step_started(&self, step: usize, max_steps: usize) {
        tracing::debug!(step, max_steps, "step started");
    }

    fn action(&self, audit: &ActionAudit) {
        let mut record = serde_json::to_value(audit).unwrap_or_default();
        if let Some(obj) = record.as_object_mut() {
            obj.insert("event".into(), "action_audit".into());
        }
        if audit.ok {
            tracing::info!(audit = %record, "action");
        } else {
            tracing::warn!(audit = %record, "action");
        }
    }

    fn run_finished(&self, status: AgentStatus, steps: usize) {
        tracing::info!(status = %status, steps, "agent run finished");
    }
}

/// 记录到内存的事件（测试用）
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    StepStarted(usize),
    Action(ActionAudit),
    RunFinished(AgentStatus, usize),
}

/// 内存日志：保留全部事件
#[derive(Debug, Default)]
pub struct MemoryActionLog {
    events: Mutex<Vec<LogEvent>>,
}

impl MemoryActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.lock().clone()
    }

    pub fn audits(&self) -> Vec<ActionAudit> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                LogEvent::Action(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ActionLog for MemoryActionLog {
    fn step_started(&self, step: usize, _max_steps: usize) {
        self.lock().push(LogEvent::StepStarted(step));
    }

    fn action(&self, audit: &ActionAudit) {
        self.lock().push(LogEvent::Action(audit.clone()));
    }

    fn run_finished(&self, status: AgentStatus, steps: usize) {
        self.lock().push(LogEvent::RunFinished(status, steps));
    }
}
