//! ccf - Rust 电脑控制框架
//!
//! 感知 → 决策 → 执行 主控循环：截屏并识别元素，交给 Brain 决定下一步动作，
//! 把动作的目标解析为设备像素后通过平台接口派发，直到完成、步数用尽、失败或取消。
//!
//! 模块划分：
//! - **agent**: 同步 / 异步主控循环、AgentConfig、运行结果
//! - **brain**: Brain 接口与适配器（闭包、脚本回放、同步转异步）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 数据模型、错误分类、坐标解析、重试引擎、动作执行、状态机
//! - **history**: 步骤历史与调试会话
//! - **observability**: tracing 初始化与动作审计
//! - **platform**: 截屏 / 鼠标 / 键盘接口与 Mock 实现
//! - **vision**: 元素检测、标注与屏幕状态采集

pub mod agent;
pub mod brain;
pub mod config;
pub mod core;
pub mod history;
pub mod observability;
pub mod platform;
pub mod vision;

pub use agent::{AgentConfig, AgentHandle, AgentRun, AsyncComputerAgent, ComputerAgent};
pub use brain::{AsyncBrain, Brain, FnBrain, ScriptedBrain, SyncBrainAdapter};
pub use crate::core::{Action, AgentError, AgentStatus, RetryConfig, ScreenState};
