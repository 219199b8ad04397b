//! 核心数据类型：坐标、矩形、屏幕元素与屏幕状态
//!
//! 坐标支持三种寻址方式：绝对像素、百分比（0..=1）、元素标签（如 "~1"）。
//! ScreenState 每轮循环重新构建，构建后不可变。

use std::collections::{HashMap, HashSet};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::error::DetectionError;

/// 坐标类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateKind {
    /// 绝对像素 (x=100, y=200)
    #[default]
    Absolute,
    /// 百分比 (x=0.5, y=0.3 表示屏幕 50% / 30% 处)
    Percentage,
}

/// 坐标点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub kind: CoordinateKind,
}

impl Point {
    pub fn absolute(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            kind: CoordinateKind::Absolute,
        }
    }

    pub fn percentage(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            kind: CoordinateKind::Percentage,
        }
    }

    /// 百分比坐标必须落在 [0, 1]；任何坐标都不能是 NaN / 无穷
    pub fn is_valid(&self) -> bool {
        if !self.x.is_finite() || !self.y.is_finite() {
            return false;
        }
        match self.kind {
            CoordinateKind::Absolute => true,
            CoordinateKind::Percentage => {
                (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
            }
        }
    }

    /// 转为绝对坐标（不钳制）
    pub fn to_absolute(&self, size: Size) -> Point {
        match self.kind {
            CoordinateKind::Absolute => *self,
            CoordinateKind::Percentage => Point::absolute(
                (self.x * size.width as f64).round(),
                (self.y * size.height as f64).round(),
            ),
        }
    }

    /// 转为百分比坐标；屏幕尺寸为 0 时返回原点
    pub fn to_percentage(&self, size: Size) -> Point {
        match self.kind {
            CoordinateKind::Percentage => *self,
            CoordinateKind::Absolute if size.is_empty() => Point::percentage(0.0, 0.0),
            CoordinateKind::Absolute => Point::percentage(
                self.x / size.width as f64,
                self.y / size.height as f64,
            ),
        }
    }
}

/// 设备像素坐标（CoordinateResolver 的输出）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pixel {
    pub x: i32,
    pub y: i32,
}

impl Pixel {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// 屏幕尺寸
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// 矩形区域（绝对像素）；宽或高为 0 表示退化元素
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// 中心点，四舍五入到整数像素
    pub fn center(&self) -> Pixel {
        let cx = self.x as f64 + self.width as f64 / 2.0;
        let cy = self.y as f64 + self.height as f64 / 2.0;
        Pixel::new(cx.round() as i32, cy.round() as i32)
    }

    pub fn contains(&self, p: Pixel) -> bool {
        let (px, py) = (p.x as i64, p.y as i64);
        px >= self.x as i64
            && py >= self.y as i64
            && px < self.x as i64 + self.width as i64
            && py < self.y as i64 + self.height as i64
    }
}

/// 屏幕元素：检测器识别到的 UI 元素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenElement {
    /// 标签（如 "~1"），同一 ScreenState 内唯一
    pub label: String,
    pub rect: Rect,
    /// 元素类型（button / text / icon 等）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_type: Option<String>,
    /// OCR 文本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl ScreenElement {
    pub fn new(label: impl Into<String>, rect: Rect) -> Self {
        Self {
            label: label.into(),
            rect,
            element_type: None,
            text: None,
            confidence: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_type(mut self, element_type: impl Into<String>) -> Self {
        self.element_type = Some(element_type.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// 屏幕状态快照：截屏 + 元素识别结果
///
/// 不变式：`label_to_rect` 的键集合等于 `elements` 中的标签集合。字段私有，构建后不可修改。
#[derive(Debug, Clone, Serialize)]
pub struct ScreenState {
    #[serde(skip)]
    screenshot: Vec<u8>,
    #[serde(skip)]
    annotated_screenshot: Option<Vec<u8>>,
    elements: Vec<ScreenElement>,
    label_to_rect: HashMap<String, Rect>,
    screen_size: Size,
    captured_at: DateTime<Utc>,
}

impl ScreenState {
    /// 由元素列表直接构建标签映射（未标注）
    pub fn new(
        screenshot: Vec<u8>,
        elements: Vec<ScreenElement>,
        screen_size: Size,
    ) -> Result<Self, DetectionError> {
        let mut label_to_rect = HashMap::with_capacity(elements.len());
        for element in &elements {
            if label_to_rect
                .insert(element.label.clone(), element.rect)
                .is_some()
            {
                return Err(DetectionError::new(format!(
                    "duplicate element label '{}'",
                    element.label
                )));
            }
        }
        Ok(Self {
            screenshot,
            annotated_screenshot: None,
            elements,
            label_to_rect,
            screen_size,
            captured_at: Utc::now(),
        })
    }

    /// 使用标注器给出的映射与标注图构建；映射键集合必须与元素标签一致
    pub fn annotated(
        screenshot: Vec<u8>,
        annotated_screenshot: Vec<u8>,
        elements: Vec<ScreenElement>,
        label_to_rect: HashMap<String, Rect>,
        screen_size: Size,
    ) -> Result<Self, DetectionError> {
        let mut labels = HashSet::with_capacity(elements.len());
        for element in &elements {
            if !labels.insert(element.label.as_str()) {
                return Err(DetectionError::new(format!(
                    "duplicate element label '{}'",
                    element.label
                )));
            }
        }
        let keys: HashSet<&str> = label_to_rect.keys().map(String::as_str).collect();
        if keys != labels {
            return Err(DetectionError::new(format!(
                "annotation map has {} label(s) but {} element(s) were detected",
                keys.len(),
                labels.len()
            )));
        }
        Ok(Self {
            screenshot,
            annotated_screenshot: Some(annotated_screenshot),
            elements,
            label_to_rect,
            screen_size,
            captured_at: Utc::now(),
        })
    }

    pub fn screenshot(&self) -> &[u8] {
        &self.screenshot
    }

    pub fn annotated_screenshot(&self) -> Option<&[u8]> {
        self.annotated_screenshot.as_deref()
    }

    pub fn screenshot_base64(&self) -> String {
        BASE64.encode(&self.screenshot)
    }

    pub fn annotated_base64(&self) -> Option<String> {
        self.annotated_screenshot.as_ref().map(|img| BASE64.encode(img))
    }

    pub fn elements(&self) -> &[ScreenElement] {
        &self.elements
    }

    pub fn label_to_rect(&self) -> &HashMap<String, Rect> {
        &self.label_to_rect
    }

    pub fn rect(&self, label: &str) -> Option<Rect> {
        self.label_to_rect.get(label).copied()
    }

    pub fn screen_size(&self) -> Size {
        self.screen_size
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn element(&self, label: &str) -> Option<&ScreenElement> {
        self.elements.iter().find(|e| e.label == label)
    }

    /// 元素的点击点（中心）
    pub fn click_point(&self, label: &str) -> Option<Pixel> {
        self.element(label).map(|e| e.rect.center())
    }
}
