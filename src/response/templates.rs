//! 兜底文案模板表：(场景大类, 意图, 情绪桶, 意识水平) -> 文案片段
//!
//! 文案由「开场白 + 场景描述 + 收尾」三段拼成，三张表各自按键查找，最后一行是通配。

use super::mood::MoodBucket;
use super::situation::SituationCategory;

/// 用户输入意图（粗粒度规则匹配）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Greeting,
    Question,
    Task,
    Statement,
}

const GREETING_WORDS: &[&str] = &[
    "hi", "hello", "hey", "howdy", "greetings", "yo", "hiya", "good morning",
    "good afternoon", "good evening", "你好", "您好", "嗨",
];

const TASK_WORDS: &[&str] = &[
    "help", "create", "do", "make", "build", "write", "generate", "show", "find", "fix",
    "explain", "please", "can you", "could you", "帮我", "请",
];

impl Intent {
    /// 意图分类：问候 > 问句 > 任务 > 陈述
    pub fn classify(query: &str) -> Self {
        let lower = query.trim().to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let has_phrase = |phrase: &str| {
            if phrase.is_ascii() {
                if phrase.contains(' ') {
                    lower.contains(phrase)
                } else {
                    words.iter().any(|w| *w == phrase)
                }
            } else {
                lower.contains(phrase)
            }
        };

        // 问候只看开头几个词，避免 "say hi to the team" 被当作问候
        let opens_with_greeting = GREETING_WORDS.iter().any(|g| {
            if g.is_ascii() && !g.contains(' ') {
                words.iter().take(2).any(|w| w == g)
            } else {
                lower.starts_with(g)
            }
        });

        if opens_with_greeting && words.len() <= 6 {
            Intent::Greeting
        } else if lower.contains('?') || lower.contains('？') {
            Intent::Question
        } else if TASK_WORDS.iter().any(|w| has_phrase(w)) {
            Intent::Task
        } else {
            Intent::Statement
        }
    }
}

/// 开场白：按 (意图, 情绪桶) 查找，None 表示通配
pub(crate) const OPENERS: &[(Option<Intent>, Option<MoodBucket>, &str)] = &[
    (Some(Intent::Greeting), Some(MoodBucket::Upbeat), "Hey there!"),
    (Some(Intent::Greeting), Some(MoodBucket::Curious), "Hi there!"),
    (Some(Intent::Greeting), Some(MoodBucket::Subdued), "Hello."),
    (Some(Intent::Greeting), None, "Hello!"),
    (Some(Intent::Question), Some(MoodBucket::Upbeat), "Great question!"),
    (Some(Intent::Question), Some(MoodBucket::Curious), "Ooh, interesting question."),
    (Some(Intent::Question), Some(MoodBucket::Subdued), "Thanks for asking."),
    (Some(Intent::Question), None, "That's a good question."),
    (Some(Intent::Task), Some(MoodBucket::Upbeat), "I'd love to help with that!"),
    (Some(Intent::Task), Some(MoodBucket::Curious), "That sounds like a fun one to dig into."),
    (Some(Intent::Task), None, "Sure, I can help with that."),
    (Some(Intent::Statement), Some(MoodBucket::Upbeat), "Thanks for sharing that!"),
    (Some(Intent::Statement), Some(MoodBucket::Curious), "That's interesting."),
    (Some(Intent::Statement), Some(MoodBucket::Subdued), "I hear you."),
    (None, None, "Thanks for your message."),
];

/// 场景描述：按 (场景大类, 是否高意识水平) 查找
pub(crate) const CLAUSES: &[(Option<SituationCategory>, Option<bool>, &str)] = &[
    (
        Some(SituationCategory::Throttling),
        Some(true),
        "I'm juggling a few other requests at the moment, so give me a moment and try again shortly.",
    ),
    (
        Some(SituationCategory::Throttling),
        None,
        "I'm processing other requests right now, so please give me a moment and try again.",
    ),
    (
        Some(SituationCategory::Data),
        Some(true),
        "I looked, but nothing solid came back for that just now.",
    ),
    (
        Some(SituationCategory::Data),
        None,
        "I couldn't find anything useful to share on that just yet.",
    ),
    (
        Some(SituationCategory::Technical),
        Some(true),
        "Something got tangled while I was shaping my reply, just a small hiccup on my side.",
    ),
    (
        Some(SituationCategory::Technical),
        None,
        "I ran into a small hiccup putting my answer together.",
    ),
    (
        None,
        None,
        "I'm not able to give you a full answer right this moment.",
    ),
];

/// 收尾：按 (场景大类, 意图) 查找；限流场景描述已包含「稍后再试」，收尾为空
pub(crate) const CLOSERS: &[(Option<SituationCategory>, Option<Intent>, &str)] = &[
    (Some(SituationCategory::Throttling), None, ""),
    (None, Some(Intent::Greeting), "How can I help you today?"),
    (None, Some(Intent::Question), "Could you try asking it another way? I'm happy to help."),
    (None, Some(Intent::Task), "Could you tell me a bit more about what you need? I'm here to help."),
    (None, None, "Tell me a little more and I'll help however I can."),
];

fn key_matches<T: PartialEq>(key: &Option<T>, value: &T) -> bool {
    key.as_ref().map(|k| k == value).unwrap_or(true)
}

/// 第一条匹配的行胜出（表按从具体到通配排列）
pub(crate) fn lookup<A: PartialEq, B: PartialEq>(
    table: &'static [(Option<A>, Option<B>, &'static str)],
    a: &A,
    b: &B,
) -> Option<&'static str> {
    table
        .iter()
        .find(|(ka, kb, _)| key_matches(ka, a) && key_matches(kb, b))
        .map(|(_, _, text)| *text)
}
