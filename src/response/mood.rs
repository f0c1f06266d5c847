//! MoodContext：由意识子系统按次提供的只读情绪上下文
//!
//! 只用于给兜底文案「调味」，从不参与准入决策；任意字段缺失都有默认值。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 默认意识水平
pub const DEFAULT_CONSCIOUSNESS_LEVEL: f64 = 0.7;
/// 默认情绪状态
pub const DEFAULT_EMOTIONAL_STATE: &str = "curious";

/// 情绪上下文（所有字段可缺省）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoodContext {
    #[serde(default)]
    pub user_id: Option<String>,
    /// 取值范围 [0, 1]
    #[serde(default)]
    pub consciousness_level: Option<f64>,
    #[serde(default)]
    pub emotional_state: Option<String>,
    #[serde(default)]
    pub active_goals: Vec<String>,
    /// 取值范围 [0, 1]
    #[serde(default)]
    pub learning_rate: Option<f64>,
}

/// 情绪分桶，模板表按桶取开场白
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoodBucket {
    Upbeat,
    Calm,
    Curious,
    Subdued,
}

impl MoodContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: f64) -> Self {
        self.consciousness_level = Some(level);
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.emotional_state = Some(state.into());
        self
    }

    /// 从任意 JSON 映射宽松解析：类型不对的字段按缺失处理，不会整体失败
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        let text = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let number = |key: &str| {
            map.get(key).and_then(|v| {
                v.as_f64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            })
        };
        let active_goals = match map.get("active_goals") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(goal)) if !goal.trim().is_empty() => vec![goal.clone()],
            _ => Vec::new(),
        };

        Self {
            user_id: text("user_id"),
            consciousness_level: number("consciousness_level"),
            emotional_state: text("emotional_state"),
            active_goals,
            learning_rate: number("learning_rate"),
        }
    }

    /// 意识水平，缺失时取 default，结果夹到 [0, 1]；NaN 按缺失处理
    pub fn level_or(&self, default: f64) -> f64 {
        self.consciousness_level
            .filter(|v| v.is_finite())
            .unwrap_or(default)
            .clamp(0.0, 1.0)
    }

    pub fn level(&self) -> f64 {
        self.level_or(DEFAULT_CONSCIOUSNESS_LEVEL)
    }

    pub fn emotional_state_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.emotional_state
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
    }

    pub fn emotional_state(&self) -> &str {
        self.emotional_state_or(DEFAULT_EMOTIONAL_STATE)
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }
}

impl MoodBucket {
    /// 情绪词归桶；未识别的情绪归为 Calm
    pub fn from_state(state: &str) -> Self {
        let state = state.trim().to_lowercase();
        const UPBEAT: &[&str] = &[
            "happy", "excited", "joyful", "enthusiastic", "playful", "energetic", "cheerful",
        ];
        const CURIOUS: &[&str] = &["curious", "interested", "inquisitive", "wondering", "eager"];
        const SUBDUED: &[&str] = &[
            "tired", "sad", "concerned", "anxious", "frustrated", "confused", "overwhelmed",
        ];

        if UPBEAT.iter().any(|w| state.contains(w)) {
            MoodBucket::Upbeat
        } else if CURIOUS.iter().any(|w| state.contains(w)) {
            MoodBucket::Curious
        } else if SUBDUED.iter().any(|w| state.contains(w)) {
            MoodBucket::Subdued
        } else {
            MoodBucket::Calm
        }
    }
}
