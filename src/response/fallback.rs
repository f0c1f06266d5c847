//! 兜底 / 限流文案生成器
//!
//! 输入 (用户问题, MoodContext, 场景, 可选 base_message)，输出一句简短自然的回复。
//! 生成过程是全函数：模板拼出的文案若不满足后置条件，则退回与输入无关的固定文案。

use tracing::{debug, warn};

use super::detector::looks_raw;
use super::mood::{MoodBucket, MoodContext, DEFAULT_CONSCIOUSNESS_LEVEL, DEFAULT_EMOTIONAL_STATE};
use super::situation::Situation;
use super::templates::{lookup, Intent, CLAUSES, CLOSERS, OPENERS};
use crate::config::FallbackSection;

/// 限流时的默认基础文案
pub const DEFAULT_THROTTLE_MESSAGE: &str = "I'm currently processing other requests.";

/// 与输入无关的最终兜底
pub const FINAL_FALLBACK: &str =
    "I'm here and happy to help. Could you give me a moment and try again?";

/// 回复里允许原样出现的用户原文最大长度（字符）
const MAX_ECHO_CHARS: usize = 40;
const MIN_REPLY_CHARS: usize = 11;

/// 生成器参数：MoodContext 缺字段时的默认值与「高意识水平」阈值
#[derive(Debug, Clone)]
pub struct FallbackSettings {
    pub default_level: f64,
    pub default_state: String,
    pub high_awareness_threshold: f64,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            default_level: DEFAULT_CONSCIOUSNESS_LEVEL,
            default_state: DEFAULT_EMOTIONAL_STATE.to_string(),
            high_awareness_threshold: 0.8,
        }
    }
}

impl From<&FallbackSection> for FallbackSettings {
    fn from(section: &FallbackSection) -> Self {
        Self {
            default_level: section.default_consciousness_level,
            default_state: section.default_emotional_state.clone(),
            high_awareness_threshold: section.high_awareness_threshold,
        }
    }
}

/// 兜底文案生成器（无状态，可随意 clone）
#[derive(Debug, Clone, Default)]
pub struct FallbackGenerator {
    settings: FallbackSettings,
}

impl FallbackGenerator {
    pub fn new(settings: FallbackSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FallbackSettings {
        &self.settings
    }

    /// 按场景生成兜底回复
    pub fn generate(&self, query: &str, mood: &MoodContext, situation: Situation) -> String {
        let reply = self.render(query, mood, situation);
        if satisfies_postconditions(&reply, query) {
            reply
        } else {
            warn!(situation = situation.tag(), "rendered fallback rejected, using final fallback");
            FINAL_FALLBACK.to_string()
        }
    }

    /// 限流回复：base_message 的措辞不会出现在回复里，只决定是否替换成默认文案
    pub fn throttled(&self, query: &str, mood: &MoodContext, base_message: Option<&str>) -> String {
        let supplied = base_message.map(str::trim).filter(|s| !s.is_empty());
        let base = supplied.unwrap_or(DEFAULT_THROTTLE_MESSAGE);
        debug!(
            substituted_default = supplied.is_none(),
            base_chars = base.chars().count(),
            "rendering throttled reply"
        );
        self.generate(query, mood, Situation::Throttled)
    }

    fn render(&self, query: &str, mood: &MoodContext, situation: Situation) -> String {
        let intent = Intent::classify(query);
        let bucket = MoodBucket::from_state(mood.emotional_state_or(&self.settings.default_state));
        let aware = mood.level_or(self.settings.default_level) >= self.settings.high_awareness_threshold;
        let category = situation.category();

        let opener = lookup(OPENERS, &intent, &bucket).unwrap_or_default();
        let clause = lookup(CLAUSES, &category, &aware).unwrap_or_default();
        let closer = lookup(CLOSERS, &category, &intent).unwrap_or_default();

        debug!(
            situation = situation.tag(),
            ?intent,
            ?bucket,
            aware,
            "composing fallback reply"
        );

        [opener, clause, closer]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn satisfies_postconditions(reply: &str, query: &str) -> bool {
    reply.chars().count() >= MIN_REPLY_CHARS
        && !looks_raw(reply)
        && !reply.to_lowercase().contains("error")
        && !echoes_query(reply, query)
}

/// 回复中是否原样包含超过 MAX_ECHO_CHARS 个字符的用户原文
fn echoes_query(reply: &str, query: &str) -> bool {
    let chars: Vec<char> = query.chars().take(2000).collect();
    if chars.len() <= MAX_ECHO_CHARS {
        return false;
    }
    chars
        .windows(MAX_ECHO_CHARS + 1)
        .any(|window| reply.contains(&window.iter().collect::<String>()))
}
