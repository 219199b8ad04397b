//! 坐标解析：把 Target（标签 / 百分比 / 绝对像素）转换为设备像素
//!
//! 纯函数，无副作用。标签优先于坐标。

use crate::core::action::Target;
use crate::core::error::{AgentError, ResolutionKind, ValidationKind};
use crate::core::types::{CoordinateKind, Pixel, ScreenState, Size};

/// 坐标解析器
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateResolver;

impl CoordinateResolver {
    pub fn new() -> Self {
        Self
    }

    /// 解析目标为设备像素
    ///
    /// - 标签：查 label→Rect，返回中心点（不存在 → UNKNOWN_LABEL，宽高为 0 → DEGENERATE_RECT）
    /// - 百分比：乘以屏幕宽高后四舍五入，钳制到 `[0, dim-1]`
    /// - 绝对：四舍五入后钳制到 `[0, dim-1]`
    /// - 都没有：MISSING_TARGET
    pub fn resolve(
        &self,
        target: &Target,
        state: &ScreenState,
        screen_size: Size,
    ) -> Result<Pixel, AgentError> {
        if let Some(label) = &target.element_label {
            let rect = state.rect(label).ok_or_else(|| {
                AgentError::resolution(
                    ResolutionKind::UnknownLabel,
                    format!("element label '{label}' not found on screen"),
                )
            })?;
            if rect.is_degenerate() {
                return Err(AgentError::resolution(
                    ResolutionKind::DegenerateRect,
                    format!(
                        "element '{label}' has empty size {}x{}",
                        rect.width, rect.height
                    ),
                ));
            }
            return Ok(rect.center());
        }

        let point = target.coordinate.ok_or_else(|| {
            AgentError::validation(
                ValidationKind::MissingTarget,
                "neither element_label nor coordinate given",
            )
        })?;
        if !point.is_valid() {
            return Err(AgentError::validation(
                ValidationKind::InvalidCoordinate,
                format!("coordinate ({}, {}) is out of range for {:?}", point.x, point.y, point.kind),
            ));
        }
        if screen_size.is_empty() {
            return Err(AgentError::resolution(
                ResolutionKind::EmptyScreen,
                format!("screen size is {}x{}", screen_size.width, screen_size.height),
            ));
        }

        let (x, y) = match point.kind {
            CoordinateKind::Percentage => (
                point.x * screen_size.width as f64,
                point.y * screen_size.height as f64,
            ),
            CoordinateKind::Absolute => (point.x, point.y),
        };
        Ok(Pixel::new(
            clamp_axis(x, screen_size.width),
            clamp_axis(y, screen_size.height),
        ))
    }
}

fn clamp_axis(value: f64, dimension: u32) -> i32 {
    let max = dimension.saturating_sub(1) as f64;
    value.round().clamp(0.0, max) as i32
}
