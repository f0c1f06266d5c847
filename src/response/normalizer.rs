//! 回复归一化：把任意 AgentResult 收敛成一条可以直接给用户看的字符串
//!
//! 分类顺序（先命中先返回）：
//! 1. 空结果 → 兜底（null_result）
//! 2. 映射：限流标记 → 限流文案；友好文本字段；列表预览；顶层字段扫描；下钻一层；否则兜底
//! 3. 字符串：去空白；形如 JSON 对象则解析后按映射处理；原始对象 / 空值字面量 / 过短 → 兜底；否则原样返回
//! 4. 带字段对象：按优先级探测字段，再处理图查询 / 摘要两类特例，最后走穷尽转换并校验
//!
//! 任何分支都以字符串结束；分类过程中的意外 panic 也会在边界被捕获并转为兜底文案。

use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::detector::{is_presentable, looks_raw};
use super::fallback::{FallbackGenerator, FallbackSettings};
use super::mood::MoodContext;
use super::situation::Situation;
use crate::agent::{AgentResult, FieldMap, OpaqueResult, RecordResult};
use crate::core::{GateError, Outcome};

/// 限流的备用指示键
const THROTTLE_KEYS: &[&str] = &["throttle", "rate_limit", "busy", "overload"];
/// 限流标记里的基础文案字段
const BASE_MESSAGE_KEYS: &[&str] = &["response", "message", "content", "text"];
/// 映射中的友好文本字段（按优先级）
const FRIENDLY_KEYS: &[&str] = &["answer", "summary", "response", "message", "text", "content"];
/// 列表预览来源字段
const LIST_KEYS: &[&str] = &["result", "records", "rows", "data"];
const LABEL_KEYS: &[&str] = &["name", "concept", "title", "id"];
const LEVEL_KEYS: &[&str] = &["level", "evolution_level", "score"];
const QUERY_KEYS: &[&str] = &["cypher", "query"];
/// 顶层字段扫描（允许把非字符串标量转成字符串）
const SCAN_KEYS: &[&str] = &["response", "answer", "output", "message", "content", "text", "result"];
/// 带字段对象的探测顺序
const RECORD_KEYS: &[&str] = &["response", "output", "answer", "message", "content", "text", "result"];
const GRAPH_TEXT_KEYS: &[&str] = &["response", "text", "description", "summary", "content"];
const GRAPH_LIST_KEYS: &[&str] = &["concepts", "records", "result", "data", "rows", "nodes"];

const NULL_WORDS: &[&str] = &["none", "null", "undefined"];
/// 穷尽转换结果中不允许出现的片段（小写比较）
const BANNED_FRAGMENTS: &[&str] = &[
    "error",
    "exception",
    "traceback",
    "failed",
    "<class",
    "object at 0x",
];

const PREVIEW_LIMIT: usize = 3;
const KEY_POINT_LIMIT: usize = 5;
const MIN_TEXT_CHARS: usize = 3;

const GRAPH_UNAVAILABLE: &str =
    "I couldn't pull anything from the knowledge graph for that just now. Could you try asking a little differently?";

/// 分类结果：可直接展示的文本，或需要改写成限流文案的标记（附带基础文案）
#[derive(Debug, PartialEq)]
enum Reply {
    Text(String),
    Throttled(Option<String>),
}

type Classified = Result<Reply, GateError>;

/// 归一化器：持有兜底文案生成器，本身无状态
#[derive(Debug, Clone, Default)]
pub struct ResponseNormalizer {
    fallback: FallbackGenerator,
}

impl ResponseNormalizer {
    pub fn new(fallback: FallbackGenerator) -> Self {
        Self { fallback }
    }

    pub fn with_settings(settings: FallbackSettings) -> Self {
        Self::new(FallbackGenerator::new(settings))
    }

    pub fn fallback(&self) -> &FallbackGenerator {
        &self.fallback
    }

    /// 归一化任意结果；永不失败，返回值非空且不像原始对象
    pub fn normalize(&self, result: &AgentResult, query: &str, mood: &MoodContext) -> String {
        let kind = result.kind();
        match panic::catch_unwind(AssertUnwindSafe(|| classify(result))) {
            Ok(Ok(Reply::Text(text))) => {
                debug!(kind, chars = text.chars().count(), "result normalized");
                self.finalize(text, query, mood)
            }
            Ok(Ok(Reply::Throttled(base))) => {
                debug!(kind, situation = Situation::Throttled.tag(), "throttle marker in result");
                self.fallback.throttled(query, mood, base.as_deref())
            }
            Ok(Err(err)) => {
                let situation = err.situation();
                debug!(kind, situation = situation.tag(), %err, "result routed to fallback");
                self.fallback.generate(query, mood, situation)
            }
            Err(_) => {
                let situation = Situation::ErrorInConversion;
                warn!(kind, situation = situation.tag(), "panic while normalizing result");
                self.fallback.generate(query, mood, situation)
            }
        }
    }

    /// 把准入层的 Outcome 转成最终回复
    pub fn normalize_outcome(&self, outcome: &Outcome, query: &str, mood: &MoodContext) -> String {
        match outcome {
            Outcome::Success(result) => self.normalize(result, query, mood),
            Outcome::Throttled { message, cause } => {
                debug!(cause = cause.tag(), "outcome throttled");
                self.fallback.throttled(query, mood, Some(message))
            }
            Outcome::Failure(err) => {
                let situation = err.situation();
                warn!(situation = situation.tag(), %err, "agent call failed");
                self.fallback.generate(query, mood, situation)
            }
        }
    }

    /// 最后一道保险：任何要返回给用户的文本都必须可展示
    fn finalize(&self, text: String, query: &str, mood: &MoodContext) -> String {
        if is_presentable(&text) {
            text
        } else {
            debug!(situation = Situation::Generic.tag(), "final guard rejected text");
            self.fallback.generate(query, mood, Situation::Generic)
        }
    }
}

/// 使用默认兜底参数归一化
pub fn normalize(result: &AgentResult, query: &str, mood: &MoodContext) -> String {
    ResponseNormalizer::default().normalize(result, query, mood)
}

/// 使用默认兜底参数把 Outcome 转成回复
pub fn normalize_outcome(outcome: &Outcome, query: &str, mood: &MoodContext) -> String {
    ResponseNormalizer::default().normalize_outcome(outcome, query, mood)
}

fn classify(result: &AgentResult) -> Classified {
    match result {
        AgentResult::Empty => Err(GateError::MalformedResult(Situation::NullResult)),
        AgentResult::Text(text) => classify_text(text),
        AgentResult::Json(value) => classify_value(value),
        AgentResult::Record(record) => classify_record(record),
        AgentResult::Graph(graph) => classify_graph(&graph.result, graph.cypher.as_deref()),
        AgentResult::Summary(summary) => classify_summary(&summary.summary, &summary.key_points),
        AgentResult::Opaque(opaque) => classify_opaque(opaque),
        AgentResult::Legacy(text) => classify_legacy(text),
    }
}

fn classify_value(value: &Value) -> Classified {
    match value {
        Value::Null => Err(GateError::MalformedResult(Situation::NullResult)),
        Value::String(text) => classify_text(text),
        Value::Object(map) => classify_mapping(map),
        Value::Array(items) => preview_entries(items, None)
            .map(Reply::Text)
            .ok_or(GateError::ConversionFailure(Situation::ConversionError)),
        Value::Bool(_) | Value::Number(_) => {
            let text = value.to_string();
            if is_presentable(&text) {
                Ok(Reply::Text(text))
            } else {
                Err(GateError::ConversionFailure(Situation::ConversionError))
            }
        }
    }
}

fn classify_text(raw: &str) -> Classified {
    let text = raw.trim();
    if text.is_empty() {
        return Err(GateError::MalformedResult(Situation::InvalidStringResult));
    }

    if text.starts_with('{') && text.ends_with('}') {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => return classify_mapping(&map),
            _ => debug!("brace-wrapped text is not a JSON object, treating as plain text"),
        }
    }

    let lower = text.to_lowercase();
    if !is_presentable(text)
        || NULL_WORDS.contains(&lower.as_str())
        || text.chars().count() < MIN_TEXT_CHARS
    {
        return Err(GateError::MalformedResult(Situation::InvalidStringResult));
    }
    Ok(Reply::Text(text.to_string()))
}

fn classify_mapping(map: &FieldMap) -> Classified {
    if is_throttle_marker(map) {
        return Ok(Reply::Throttled(first_non_empty(map, BASE_MESSAGE_KEYS)));
    }
    if let Some(text) = first_text(map, FRIENDLY_KEYS) {
        return Ok(Reply::Text(text));
    }
    if let Some(preview) = list_preview(map, LIST_KEYS, None) {
        return Ok(Reply::Text(preview));
    }
    if let Some(text) = scan_fields(map, SCAN_KEYS) {
        return Ok(Reply::Text(text));
    }
    for value in map.values() {
        if let Value::Object(inner) = value {
            if let Some(text) = scan_fields(inner, SCAN_KEYS) {
                return Ok(Reply::Text(text));
            }
        }
    }
    Err(GateError::MalformedResult(Situation::NoValidDictResponse))
}

fn classify_record(record: &RecordResult) -> Classified {
    let fields = &record.fields;
    if let Some(text) = scan_fields(fields, RECORD_KEYS) {
        return Ok(Reply::Text(text));
    }

    // 图查询类：字段里嵌着 result 映射
    if let Some(Value::Object(inner)) = fields.get("result") {
        let cypher = QUERY_KEYS
            .iter()
            .find_map(|k| fields.get(*k).and_then(Value::as_str));
        if let Ok(reply) = classify_graph(inner, cypher) {
            return Ok(reply);
        }
    }

    // 摘要类：带 summary 字段
    if let Some(Value::String(summary)) = fields.get("summary") {
        let key_points: Vec<String> = fields
            .get("key_points")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if let Ok(reply) = classify_summary(summary, &key_points) {
            return Ok(reply);
        }
    }

    for value in fields.values() {
        if let Value::Object(inner) = value {
            if let Some(text) = scan_fields(inner, RECORD_KEYS) {
                return Ok(Reply::Text(text));
            }
        }
    }

    exhaustive_conversion(&record.type_name, record.display.as_deref(), None)
}

fn classify_graph(result: &FieldMap, cypher: Option<&str>) -> Classified {
    if let Some(text) = first_text(result, GRAPH_TEXT_KEYS) {
        return Ok(Reply::Text(text));
    }
    if let Some(preview) = list_preview(result, GRAPH_LIST_KEYS, cypher) {
        return Ok(Reply::Text(preview));
    }
    if result.get("error").map(|e| !e.is_null()).unwrap_or(false) {
        return Ok(Reply::Text(GRAPH_UNAVAILABLE.to_string()));
    }
    Err(GateError::MalformedResult(Situation::NoValidDictResponse))
}

fn classify_summary(summary: &str, key_points: &[String]) -> Classified {
    let summary = summary.trim();
    let points: Vec<String> = key_points
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty() && is_presentable(p))
        .take(KEY_POINT_LIMIT)
        .map(|p| format!("• {p}"))
        .collect();
    let has_summary = is_presentable(summary);

    match (has_summary, points.is_empty()) {
        (true, true) => Ok(Reply::Text(summary.to_string())),
        (true, false) => Ok(Reply::Text(format!(
            "{summary}\n\nKey points:\n{}",
            points.join("\n")
        ))),
        (false, false) => Ok(Reply::Text(format!("Key points:\n{}", points.join("\n")))),
        (false, true) => Err(GateError::MalformedResult(Situation::NoValidDictResponse)),
    }
}

fn classify_opaque(opaque: &OpaqueResult) -> Classified {
    if let Some(text) = opaque.display.as_deref().map(str::trim) {
        if is_presentable(text) {
            return Ok(Reply::Text(text.to_string()));
        }
    }
    if opaque.debug.is_none() {
        debug!(type_name = %opaque.type_name, "opaque result has no usable string form");
        return Err(GateError::ConversionFailure(Situation::ConversionError));
    }
    exhaustive_conversion(&opaque.type_name, opaque.display.as_deref(), opaque.debug.as_deref())
}

fn classify_legacy(text: &str) -> Classified {
    match recover_legacy_payload(text) {
        Some(payload) => classify_text(&payload),
        None => classify_text(text),
    }
}

/// 穷尽转换：Display → Debug，逐个校验；都不可用时交给兜底文案
fn exhaustive_conversion(type_name: &str, display: Option<&str>, debug: Option<&str>) -> Classified {
    let mut had_candidate = false;
    for candidate in [display, debug].into_iter().flatten() {
        had_candidate = true;
        let candidate = candidate.trim();
        if passes_final_validation(candidate) {
            return Ok(Reply::Text(candidate.to_string()));
        }
    }

    debug!(type_name, had_candidate, "no candidate passed final validation");
    let situation = if had_candidate {
        Situation::FinalConversionFailed
    } else {
        Situation::CompleteConversionFailure
    };
    Err(GateError::ConversionFailure(situation))
}

fn passes_final_validation(text: &str) -> bool {
    let lower = text.to_lowercase();
    is_presentable(text)
        && text.chars().count() >= MIN_TEXT_CHARS
        && !BANNED_FRAGMENTS.iter().any(|f| lower.contains(f))
        && !looks_like_debug_dump(text)
}

static DEBUG_DUMP_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// `TypeName { .. }` / `TypeName(..)` 形式的调试输出
fn looks_like_debug_dump(text: &str) -> bool {
    DEBUG_DUMP_RE
        .get_or_init(|| Regex::new(r"(?s)^[A-Za-z_][A-Za-z0-9_:]*\s*(\{.*\}|\(.*\))$").ok())
        .as_ref()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

static LEGACY_FIELD_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 从字符串化的包装对象中取出 output= / response= 等字段的引号内容
fn recover_legacy_payload(text: &str) -> Option<String> {
    let re = LEGACY_FIELD_RE
        .get_or_init(|| {
            Regex::new(
                r#"(?s)\b(?:output|response|answer|content|text)\s*=\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")"#,
            )
            .ok()
        })
        .as_ref()?;
    let caps = re.captures(text)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
    Some(unescape(raw))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn is_throttle_marker(map: &FieldMap) -> bool {
    let status_throttled = map
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.to_lowercase().contains("throttl"))
        .unwrap_or(false);
    status_throttled || THROTTLE_KEYS.iter().any(|k| map.contains_key(*k))
}

/// 第一个非空字符串字段（不做可展示校验，基础文案不会直接展示）
fn first_non_empty(map: &FieldMap, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        map.get(*k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// 第一个可展示的字符串字段
fn first_text(map: &FieldMap, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        map.get(*k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| is_presentable(s))
            .map(str::to_string)
    })
}

/// 第一个能转成可展示字符串的字段（非字符串值先序列化）
fn scan_fields(map: &FieldMap, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| map.get(*k).and_then(coerce))
}

fn coerce(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok()?,
    };
    is_presentable(&text).then_some(text)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            is_presentable(s).then(|| s.to_string())
        }
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        _ => None,
    }
}

/// 列表预览：取 keys 中第一个非空列表字段，附带 cypher / query 代码块
fn list_preview(map: &FieldMap, keys: &[&str], cypher: Option<&str>) -> Option<String> {
    let items = keys.iter().find_map(|k| match map.get(*k) {
        Some(Value::Array(items)) if !items.is_empty() => Some(items),
        _ => None,
    })?;
    let query = cypher
        .or_else(|| QUERY_KEYS.iter().find_map(|k| map.get(*k).and_then(Value::as_str)))
        .map(str::trim)
        .filter(|q| !q.is_empty());
    preview_entries(items, query)
}

fn preview_entries(items: &[Value], query: Option<&str>) -> Option<String> {
    let lines: Vec<String> = items
        .iter()
        .take(PREVIEW_LIMIT)
        .filter_map(entry_line)
        .collect();
    if lines.is_empty() {
        return None;
    }

    let mut out = String::from("Here's what I found:\n");
    out.push_str(&lines.join("\n"));
    if items.len() > PREVIEW_LIMIT {
        out.push_str(&format!("\n…and {} more", items.len() - PREVIEW_LIMIT));
    }
    if let Some(query) = query {
        out.push_str(&format!("\n\nQuery used:\n```cypher\n{query}\n```"));
    }
    Some(out)
}

fn entry_line(entry: &Value) -> Option<String> {
    match entry {
        Value::Object(fields) => {
            let label = LABEL_KEYS
                .iter()
                .find_map(|k| fields.get(*k).and_then(scalar_text))?;
            let level = LEVEL_KEYS
                .iter()
                .find_map(|k| fields.get(*k).and_then(scalar_text).map(|v| (*k, v)));
            Some(match level {
                Some((key, value)) => format!("• {label} ({}: {value})", key.replace('_', " ")),
                None => format!("• {label}"),
            })
        }
        other => scalar_text(other).map(|s| format!("• {s}")),
    }
}
