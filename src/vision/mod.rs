//! 感知层：截屏 → 元素检测 → 标注 → ScreenState
//!
//! 检测与标注算法在核心之外实现，这里只定义接口和几个组合用的小工具。
//! 截屏与检测失败不重试，直接上抛。

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{AgentError, DetectionError, Rect, ScreenElement, ScreenState};
use crate::platform::PlatformController;

/// 元素检测器
pub trait ElementDetector: Send + Sync {
    fn detect(&self, image: &[u8]) -> Result<Vec<ScreenElement>, DetectionError>;

    /// 同时返回检测器自带的标注图（如 OmniParser）；默认无标注图
    fn detect_with_image(
        &self,
        image: &[u8],
    ) -> Result<(Vec<ScreenElement>, Option<Vec<u8>>), DetectionError> {
        Ok((self.detect(image)?, None))
    }
}

/// 标注器：在截图上绘制标签，返回 label→Rect 映射与标注图
pub trait Annotator: Send + Sync {
    fn annotate(
        &self,
        image: &[u8],
        elements: &[ScreenElement],
    ) -> Result<(HashMap<String, Rect>, Vec<u8>), DetectionError>;
}

/// 空检测器：不识别任何元素（仅靠坐标操作时使用）
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDetector;

impl ElementDetector for NoopDetector {
    fn detect(&self, _image: &[u8]) -> Result<Vec<ScreenElement>, DetectionError> {
        Ok(Vec::new())
    }
}

type DetectFn = dyn Fn(&[u8]) -> Result<Vec<ScreenElement>, DetectionError> + Send + Sync;

/// 闭包检测器
pub struct FnDetector {
    detect: Box<DetectFn>,
}

impl FnDetector {
    pub fn new<F>(detect: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Vec<ScreenElement>, DetectionError> + Send + Sync + 'static,
    {
        Self {
            detect: Box::new(detect),
        }
    }
}

impl ElementDetector for FnDetector {
    fn detect(&self, image: &[u8]) -> Result<Vec<ScreenElement>, DetectionError> {
        (self.detect)(image)
    }
}

/// 组合检测器：依次运行各检测器并合并结果，按出现顺序重新编号为 ~0..~n
#[derive(Default)]
pub struct CompositeDetector {
    detectors: Vec<Arc<dyn ElementDetector>>,
}

impl CompositeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, detector: Arc<dyn ElementDetector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl ElementDetector for CompositeDetector {
    fn detect(&self, image: &[u8]) -> Result<Vec<ScreenElement>, DetectionError> {
        let mut merged = Vec::new();
        for detector in &self.detectors {
            merged.extend(detector.detect(image)?);
        }
        for (i, element) in merged.iter_mut().enumerate() {
            element.label = format!("~{i}");
        }
        Ok(merged)
    }
}

/// 仅构建 label→Rect、不绘制的标注器；标注图即原图
#[derive(Debug, Default, Clone, Copy)]
pub struct LabelMapAnnotator;

impl Annotator for LabelMapAnnotator {
    fn annotate(
        &self,
        image: &[u8],
        elements: &[ScreenElement],
    ) -> Result<(HashMap<String, Rect>, Vec<u8>), DetectionError> {
        let map = elements
            .iter()
            .map(|e| (e.label.clone(), e.rect))
            .collect();
        Ok((map, image.to_vec()))
    }
}

/// 感知流水线：平台截屏 + 可选检测器 + 可选标注器
#[derive(Clone)]
pub struct Perception {
    platform: Arc<dyn PlatformController>,
    detector: Option<Arc<dyn ElementDetector>>,
    annotator: Option<Arc<dyn Annotator>>,
}

impl Perception {
    pub fn new(platform: Arc<dyn PlatformController>) -> Self {
        Self {
            platform,
            detector: None,
            annotator: None,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn ElementDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_annotator(mut self, annotator: Arc<dyn Annotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn platform(&self) -> &Arc<dyn PlatformController> {
        &self.platform
    }

    /// 采集一帧屏幕状态；`annotate` 为 false 或没有元素时跳过标注
    pub fn capture(&self, annotate: bool) -> Result<ScreenState, AgentError> {
        let screenshot = self.platform.screenshot()?;
        let screen_size = self.platform.screen_size()?;

        let (elements, detector_image) = match &self.detector {
            Some(detector) => detector.detect_with_image(&screenshot)?,
            None => (Vec::new(), None),
        };

        if annotate && !elements.is_empty() {
            if let Some(annotator) = &self.annotator {
                let (map, annotated) = annotator.annotate(&screenshot, &elements)?;
                let state =
                    ScreenState::annotated(screenshot, annotated, elements, map, screen_size)?;
                tracing::debug!(elements = state.elements().len(), "screen captured (annotated)");
                return Ok(state);
            }
            if let Some(annotated) = detector_image {
                let map = elements
                    .iter()
                    .map(|e| (e.label.clone(), e.rect))
                    .collect();
                return Ok(ScreenState::annotated(
                    screenshot,
                    annotated,
                    elements,
                    map,
                    screen_size,
                )?);
            }
        }

        let state = ScreenState::new(screenshot, elements, screen_size)?;
        tracing::debug!(elements = state.elements().len(), "screen captured");
        Ok(state)
    }
}
