//! 原始对象检测：判断字符串是否像内部对象转储（而不是自然语言）
//!
//! 归一化流程中任何被提取出来的字符串都要先过这一关，命中则丢弃并走兜底文案。

use std::sync::OnceLock;

use regex::Regex;

/// 直接视为「没有内容」的字面量
const RAW_LITERALS: &[&str] = &["None", "null", "undefined", "{}", "[]"];

/// 内部包装类型的 repr 前缀
const WRAPPER_MARKERS: &[&str] = &[
    "AgentRunResult(",
    "RunResult(",
    "ModelResponse(",
    "ToolReturnPart(",
];

static OBJECT_TOKEN_RE: OnceLock<Option<Regex>> = OnceLock::new();
static CLASS_TOKEN_RE: OnceLock<Option<Regex>> = OnceLock::new();
static ADDRESS_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn object_token_re() -> Option<&'static Regex> {
    OBJECT_TOKEN_RE
        .get_or_init(|| Regex::new(r"<[^<>]*\bobject\b[^<>]*>").ok())
        .as_ref()
}

fn class_token_re() -> Option<&'static Regex> {
    CLASS_TOKEN_RE
        .get_or_init(|| Regex::new(r"<class\s+[^<>]*>").ok())
        .as_ref()
}

fn address_re() -> Option<&'static Regex> {
    ADDRESS_RE
        .get_or_init(|| Regex::new(r"0x[0-9a-fA-F]{6,}").ok())
        .as_ref()
}

fn is_match(re: Option<&Regex>, s: &str) -> bool {
    re.map(|re| re.is_match(s)).unwrap_or(false)
}

/// 是否像原始对象转储
///
/// 空串/纯空白、`None`/`null` 等字面量、`<... object ...>`、`<class ...>`、`object at 0x`、
/// 带内存地址的 `{}`/`[]` 包裹体、内部包装类型 repr、Python 风格 Traceback 均视为原始对象。
pub fn looks_raw(s: &str) -> bool {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return true;
    }
    if RAW_LITERALS.contains(&trimmed) {
        return true;
    }
    if trimmed.contains("object at 0x") {
        return true;
    }
    if WRAPPER_MARKERS.iter().any(|m| trimmed.contains(m)) {
        return true;
    }
    if trimmed.contains("Traceback") && trimmed.contains("Error:") {
        return true;
    }

    let wrapped = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if wrapped && is_match(address_re(), trimmed) {
        return true;
    }

    is_match(object_token_re(), trimmed) || is_match(class_token_re(), trimmed)
}

/// 可以直接给用户看的字符串：不是原始对象，且不以 `{`、`[`、`<` 开头
pub fn is_presentable(s: &str) -> bool {
    let trimmed = s.trim();
    !looks_raw(trimmed) && !trimmed.starts_with(['{', '[', '<'])
}
