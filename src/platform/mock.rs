//! Mock 平台（用于测试，无需真实桌面）
//!
//! 记录每一次调用；可预先排入失败，按调用顺序依次消费。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::core::{MouseButton, Pixel, PlatformError, PlatformErrorKind, Size};
use crate::platform::PlatformController;

/// 被记录的平台调用
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    Screenshot,
    MouseMove { to: Pixel },
    MouseClick { at: Pixel, button: MouseButton, clicks: u32 },
    MouseDrag { from: Pixel, to: Pixel },
    MouseScroll { amount: i32, at: Option<Pixel>, horizontal: bool },
    TypeText(String),
    KeyPress(String),
    KeyDown(String),
    KeyUp(String),
}

impl PlatformCall {
    /// 是否为输入事件（截屏之外的调用）
    pub fn is_input(&self) -> bool {
        !matches!(self, Self::Screenshot)
    }
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<PlatformCall>,
    /// 输入事件的待注入失败
    input_failures: VecDeque<PlatformError>,
    screenshot_failures: VecDeque<PlatformError>,
    cursor: Pixel,
}

/// Mock 平台：固定屏幕尺寸，截图返回固定字节
#[derive(Debug)]
pub struct MockPlatform {
    size: Size,
    image: Vec<u8>,
    latency: Duration,
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new(Size::new(1920, 1080))
    }
}

impl MockPlatform {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            image: b"\x89PNG mock".to_vec(),
            latency: Duration::ZERO,
            state: Mutex::new(MockState::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// 每次输入调用前阻塞指定时长（模拟慢速输入）
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 接下来的 `times` 次输入调用以 `kind` 失败
    pub fn fail_next_inputs(&self, times: usize, kind: PlatformErrorKind) {
        let mut state = self.lock();
        for i in 0..times {
            state
                .input_failures
                .push_back(PlatformError::new(kind, format!("injected failure #{}", i + 1)));
        }
    }

    pub fn fail_next_screenshot(&self, kind: PlatformErrorKind) {
        self.lock()
            .screenshot_failures
            .push_back(PlatformError::new(kind, "injected screenshot failure"));
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.lock().calls.clone()
    }

    pub fn input_calls(&self) -> Vec<PlatformCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_input())
            .cloned()
            .collect()
    }

    pub fn screenshot_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, PlatformCall::Screenshot))
            .count()
    }

    /// 观察到的同时进行中的输入调用数峰值
    pub fn max_concurrent_inputs(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // 测试替身：锁中毒时继续使用内部数据
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn input(&self, call: PlatformCall) -> Result<(), PlatformError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let result = self.record_input(call);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn record_input(&self, call: PlatformCall) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.calls.push(call.clone());
        if let Some(err) = state.input_failures.pop_front() {
            return Err(err);
        }
        match call {
            PlatformCall::MouseMove { to } | PlatformCall::MouseDrag { to, .. } => state.cursor = to,
            PlatformCall::MouseClick { at, .. } => state.cursor = at,
            _ => {}
        }
        Ok(())
    }
}

impl PlatformController for MockPlatform {
    fn screen_size(&self) -> Result<Size, PlatformError> {
        Ok(self.size)
    }

    fn mouse_position(&self) -> Result<Pixel, PlatformError> {
        Ok(self.lock().cursor)
    }

    fn screenshot(&self) -> Result<Vec<u8>, PlatformError> {
        let mut state = self.lock();
        state.calls.push(PlatformCall::Screenshot);
        match state.screenshot_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(self.image.clone()),
        }
    }

    fn mouse_move(&self, to: Pixel, _duration: Duration) -> Result<(), PlatformError> {
        self.input(PlatformCall::MouseMove { to })
    }

    fn mouse_click(&self, at: Pixel, button: MouseButton, clicks: u32) -> Result<(), PlatformError> {
        self.input(PlatformCall::MouseClick { at, button, clicks })
    }

    fn mouse_drag(
        &self,
        from: Pixel,
        to: Pixel,
        _button: MouseButton,
        _duration: Duration,
    ) -> Result<(), PlatformError> {
        self.input(PlatformCall::MouseDrag { from, to })
    }

    fn mouse_scroll(&self, amount: i32, at: Option<Pixel>, horizontal: bool) -> Result<(), PlatformError> {
        self.input(PlatformCall::MouseScroll {
            amount,
            at,
            horizontal,
        })
    }

    fn type_text(&self, text: &str) -> Result<(), PlatformError> {
        self.input(PlatformCall::TypeText(text.to_string()))
    }

    fn key_press(&self, key: &str) -> Result<(), PlatformError> {
        self.input(PlatformCall::KeyPress(key.to_string()))
    }

    fn key_down(&self, key: &str) -> Result<(), PlatformError> {
        self.input(PlatformCall::KeyDown(key.to_string()))
    }

    fn key_up(&self, key: &str) -> Result<(), PlatformError> {
        self.input(PlatformCall::KeyUp(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_and_injects_failures() {
        let mock = MockPlatform::new(Size::new(800, 600));
        mock.fail_next_inputs(1, PlatformErrorKind::Busy);

        let first = mock.mouse_click(Pixel::new(1, 2), MouseButton::Left, 1);
        assert_eq!(first.unwrap_err().kind, PlatformErrorKind::Busy);
        mock.mouse_click(Pixel::new(1, 2), MouseButton::Left, 1).unwrap();

        assert_eq!(mock.input_calls().len(), 2);
        assert_eq!(mock.mouse_position().unwrap(), Pixel::new(1, 2));
    }

    #[test]
    fn test_default_hotkey_presses_then_releases_in_reverse() {
        let mock = MockPlatform::default();
        mock.hotkey(&["ctrl".to_string(), "shift".to_string(), "t".to_string()])
            .unwrap();
        assert_eq!(
            mock.calls(),
            vec![
                PlatformCall::KeyDown("ctrl".into()),
                PlatformCall::KeyDown("shift".into()),
                PlatformCall::KeyDown("t".into()),
                PlatformCall::KeyUp("t".into()),
                PlatformCall::KeyUp("shift".into()),
                PlatformCall::KeyUp("ctrl".into()),
            ]
        );
    }

    #[test]
    fn test_screenshot_failure_is_one_shot() {
        let mock = MockPlatform::default();
        mock.fail_next_screenshot(PlatformErrorKind::Unavailable);
        assert!(mock.screenshot().is_err());
        assert!(mock.screenshot().is_ok());
        assert_eq!(mock.screenshot_count(), 2);
    }
}
