//! 平台能力接口：截屏、鼠标、键盘
//!
//! 各操作系统的具体实现在核心之外提供；核心只依赖 `PlatformController`。
//! 任何调用都可能返回 PlatformError，是否重试由当前 RetryConfig 的谓词决定。

pub mod mock;

use std::time::Duration;

use crate::core::{MouseButton, Pixel, PlatformError, Size};

pub use mock::{MockPlatform, PlatformCall};

/// 平台控制器
///
/// 所有坐标均为设备像素。实现需 `Send + Sync`：异步循环会在阻塞线程池中调用它。
pub trait PlatformController: Send + Sync {
    fn screen_size(&self) -> Result<Size, PlatformError>;

    fn mouse_position(&self) -> Result<Pixel, PlatformError>;

    /// 全屏截图（PNG 字节）
    fn screenshot(&self) -> Result<Vec<u8>, PlatformError>;

    /// `duration` 为零表示瞬移
    fn mouse_move(&self, to: Pixel, duration: Duration) -> Result<(), PlatformError>;

    fn mouse_click(&self, at: Pixel, button: MouseButton, clicks: u32) -> Result<(), PlatformError>;

    fn mouse_drag(
        &self,
        from: Pixel,
        to: Pixel,
        button: MouseButton,
        duration: Duration,
    ) -> Result<(), PlatformError>;

    /// `at` 为空时在当前位置滚动；正数向上 / 向右
    fn mouse_scroll(&self, amount: i32, at: Option<Pixel>, horizontal: bool) -> Result<(), PlatformError>;

    fn type_text(&self, text: &str) -> Result<(), PlatformError>;

    fn key_press(&self, key: &str) -> Result<(), PlatformError>;

    fn key_down(&self, key: &str) -> Result<(), PlatformError>;

    fn key_up(&self, key: &str) -> Result<(), PlatformError>;

    /// 组合键：按顺序按下，逆序释放
    fn hotkey(&self, keys: &[String]) -> Result<(), PlatformError> {
        for key in keys {
            self.key_down(key)?;
        }
        for key in keys.iter().rev() {
            self.key_up(key)?;
        }
        Ok(())
    }
}
