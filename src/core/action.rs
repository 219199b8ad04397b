//! Action：Brain 的输出格式
//!
//! `Action` 是按动作类型区分载荷的标签枚举，执行层对其穷尽匹配；
//! `ActionRequest` 是与数据模型一一对应的扁平线格式（所有字段可选），
//! 经 `TryFrom` 转换时对缺失字段报 ValidationError。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::error::{AgentError, ValidationKind};
use crate::core::types::Point;

/// 鼠标按键
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// 滚动方向
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn is_horizontal(&self) -> bool {
        matches!(self, Self::Left | Self::Right)
    }

    /// down / left 为负方向；i32::MIN 取反时饱和到 i32::MAX
    pub fn signed(&self, amount: i32) -> i32 {
        match self {
            Self::Down | Self::Left => amount.saturating_neg(),
            Self::Up | Self::Right => amount,
        }
    }
}

/// 动作目标：坐标或元素标签，两者同时给出时标签优先
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_label: Option<String>,
}

impl Target {
    pub fn point(point: Point) -> Self {
        Self {
            coordinate: Some(point),
            element_label: None,
        }
    }

    pub fn label(label: impl Into<String>) -> Self {
        Self {
            coordinate: None,
            element_label: Some(label.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.coordinate.is_none() && self.element_label.is_none()
    }
}

/// 动作类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    DoubleClick,
    RightClick,
    MouseMove,
    Drag,
    Scroll,
    TypeText,
    KeyPress,
    KeyDown,
    KeyUp,
    Hotkey,
    Wait,
    Done,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::DoubleClick => "double_click",
            Self::RightClick => "right_click",
            Self::MouseMove => "mouse_move",
            Self::Drag => "drag",
            Self::Scroll => "scroll",
            Self::TypeText => "type_text",
            Self::KeyPress => "key_press",
            Self::KeyDown => "key_down",
            Self::KeyUp => "key_up",
            Self::Hotkey => "hotkey",
            Self::Wait => "wait",
            Self::Done => "done",
        }
    }
}

fn one() -> u32 {
    1
}

/// Brain 产出的一条动作指令；产出后不可变，由 ActionExecutor 消费一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Action {
    Click {
        target: Target,
        #[serde(default)]
        button: MouseButton,
        #[serde(default = "one")]
        clicks: u32,
    },
    DoubleClick {
        target: Target,
        #[serde(default)]
        button: MouseButton,
    },
    RightClick {
        target: Target,
    },
    MouseMove {
        target: Target,
        /// 移动耗时（秒），0 表示瞬移
        #[serde(default)]
        duration: f64,
    },
    Drag {
        from: Target,
        to: Target,
        #[serde(default)]
        button: MouseButton,
        #[serde(default)]
        duration: f64,
    },
    /// 目标为空时在当前鼠标位置滚动
    Scroll {
        #[serde(default)]
        target: Target,
        amount: i32,
        #[serde(default)]
        direction: ScrollDirection,
    },
    TypeText {
        text: String,
    },
    /// 依次按下并释放每个键
    KeyPress {
        keys: Vec<String>,
    },
    KeyDown {
        key: String,
    },
    KeyUp {
        key: String,
    },
    /// 组合键，如 ["ctrl", "c"]
    Hotkey {
        keys: Vec<String>,
    },
    Wait {
        duration: f64,
    },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

impl Action {
    pub fn click(target: Target) -> Self {
        Self::Click {
            target,
            button: MouseButton::Left,
            clicks: 1,
        }
    }

    pub fn click_label(label: impl Into<String>) -> Self {
        Self::click(Target::label(label))
    }

    pub fn click_at(x: f64, y: f64) -> Self {
        Self::click(Target::point(Point::absolute(x, y)))
    }

    pub fn type_text(text: impl Into<String>) -> Self {
        Self::TypeText { text: text.into() }
    }

    pub fn hotkey<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Hotkey {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn wait(seconds: f64) -> Self {
        Self::Wait { duration: seconds }
    }

    pub fn done() -> Self {
        Self::Done { summary: None }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Click { .. } => ActionKind::Click,
            Self::DoubleClick { .. } => ActionKind::DoubleClick,
            Self::RightClick { .. } => ActionKind::RightClick,
            Self::MouseMove { .. } => ActionKind::MouseMove,
            Self::Drag { .. } => ActionKind::Drag,
            Self::Scroll { .. } => ActionKind::Scroll,
            Self::TypeText { .. } => ActionKind::TypeText,
            Self::KeyPress { .. } => ActionKind::KeyPress,
            Self::KeyDown { .. } => ActionKind::KeyDown,
            Self::KeyUp { .. } => ActionKind::KeyUp,
            Self::Hotkey { .. } => ActionKind::Hotkey,
            Self::Wait { .. } => ActionKind::Wait,
            Self::Done { .. } => ActionKind::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// 解析 Brain 输出的扁平 JSON（ActionRequest 格式）
    pub fn from_json(raw: &str) -> Result<Self, AgentError> {
        let request: ActionRequest = serde_json::from_str(raw).map_err(|e| {
            AgentError::validation(ValidationKind::MissingField, format!("invalid action json: {e}"))
        })?;
        Action::try_from(request)
    }
}

/// 扁平线格式：与数据模型字段一一对应，供 LLM 类 Brain 直接输出
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionRequest {
    pub action_type: Option<ActionKind>,
    #[serde(default)]
    pub coordinate: Option<Point>,
    #[serde(default)]
    pub end_coordinate: Option<Point>,
    #[serde(default)]
    pub element_label: Option<String>,
    #[serde(default)]
    pub end_element_label: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub keys: Option<Vec<String>>,
    #[serde(default)]
    pub scroll_amount: Option<i32>,
    #[serde(default)]
    pub scroll_direction: Option<ScrollDirection>,
    /// 秒
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub button: Option<MouseButton>,
    #[serde(default)]
    pub clicks: Option<u32>,
}

impl ActionRequest {
    /// 线格式的 JSON Schema（可嵌入 Brain 的提示词）
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(ActionRequest);
        serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
    }

    fn target(&self) -> Target {
        Target {
            coordinate: self.coordinate,
            element_label: self.element_label.clone(),
        }
    }

    fn end_target(&self) -> Target {
        Target {
            coordinate: self.end_coordinate,
            element_label: self.end_element_label.clone(),
        }
    }
}

fn missing(kind: ActionKind, field: &str) -> AgentError {
    AgentError::validation(
        ValidationKind::MissingField,
        format!("{} requires '{}'", kind.as_str(), field),
    )
}

fn single_key(request: &ActionRequest, kind: ActionKind) -> Result<String, AgentError> {
    request
        .keys
        .as_ref()
        .and_then(|keys| keys.first().cloned())
        .or_else(|| request.text.clone())
        .ok_or_else(|| missing(kind, "keys"))
}

impl TryFrom<ActionRequest> for Action {
    type Error = AgentError;

    fn try_from(request: ActionRequest) -> Result<Self, Self::Error> {
        let kind = request.action_type.ok_or_else(|| {
            AgentError::validation(ValidationKind::MissingField, "missing 'action_type'")
        })?;
        let button = request.button.unwrap_or_default();
        let duration = request.duration.unwrap_or(0.0);

        let action = match kind {
            ActionKind::Click => Action::Click {
                target: request.target(),
                button,
                clicks: request.clicks.unwrap_or(1),
            },
            ActionKind::DoubleClick => Action::DoubleClick {
                target: request.target(),
                button,
            },
            ActionKind::RightClick => Action::RightClick {
                target: request.target(),
            },
            ActionKind::MouseMove => Action::MouseMove {
                target: request.target(),
                duration,
            },
            ActionKind::Drag => Action::Drag {
                from: request.target(),
                to: request.end_target(),
                button,
                duration,
            },
            ActionKind::Scroll => Action::Scroll {
                target: request.target(),
                amount: request
                    .scroll_amount
                    .ok_or_else(|| missing(kind, "scroll_amount"))?,
                direction: request.scroll_direction.unwrap_or_default(),
            },
            ActionKind::TypeText => Action::TypeText {
                text: request.text.clone().ok_or_else(|| missing(kind, "text"))?,
            },
            ActionKind::KeyPress => Action::KeyPress {
                keys: match (&request.keys, &request.text) {
                    (Some(keys), _) => keys.clone(),
                    (None, Some(text)) => vec![text.clone()],
                    (None, None) => return Err(missing(kind, "keys")),
                },
            },
            ActionKind::KeyDown => Action::KeyDown {
                key: single_key(&request, kind)?,
            },
            ActionKind::KeyUp => Action::KeyUp {
                key: single_key(&request, kind)?,
            },
            ActionKind::Hotkey => Action::Hotkey {
                keys: request.keys.clone().ok_or_else(|| missing(kind, "keys"))?,
            },
            ActionKind::Wait => Action::Wait {
                duration: request.duration.ok_or_else(|| missing(kind, "duration"))?,
            },
            ActionKind::Done => Action::Done {
                summary: request.text.clone(),
            },
        };
        Ok(action)
    }
}
