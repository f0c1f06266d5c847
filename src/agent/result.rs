//! AgentResult：Agent 边界上的封闭结果类型
//!
//! 每个 Agent 声明自己返回哪种变体，归一化层对这个封闭集合做一次 match，
//! 不再对任意对象做字段探测。Legacy 变体保留给仍然只能吐出字符串化对象的旧来源。

use serde_json::Value;

/// 字段表
pub type FieldMap = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum AgentResult {
    /// 没有结果
    Empty,
    /// 纯文本
    Text(String),
    /// 任意 JSON（映射、列表、标量）
    Json(Value),
    /// 带字段表的对象
    Record(RecordResult),
    /// 图查询结果
    Graph(GraphQueryResult),
    /// 摘要类结果
    Summary(SummaryResult),
    /// 没有字段的不透明对象，只有字符串表示
    Opaque(OpaqueResult),
    /// 旧来源的字符串化对象，例如 `AgentRunResult(output='...')`
    Legacy(String),
}

/// 带字段表的对象（例如某个 Agent 的运行结果结构）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordResult {
    pub type_name: String,
    pub fields: FieldMap,
    /// Display 形式，没有则为 None
    pub display: Option<String>,
}

/// 图查询结果：result 映射 + 可选 Cypher 语句
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphQueryResult {
    pub result: FieldMap,
    pub cypher: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SummaryResult {
    pub summary: String,
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpaqueResult {
    pub type_name: String,
    pub display: Option<String>,
    pub debug: Option<String>,
}

impl AgentResult {
    /// 变体名（用于日志）
    pub fn kind(&self) -> &'static str {
        match self {
            AgentResult::Empty => "empty",
            AgentResult::Text(_) => "text",
            AgentResult::Json(_) => "json",
            AgentResult::Record(_) => "record",
            AgentResult::Graph(_) => "graph",
            AgentResult::Summary(_) => "summary",
            AgentResult::Opaque(_) => "opaque",
            AgentResult::Legacy(_) => "legacy",
        }
    }

    pub fn record(type_name: impl Into<String>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => FieldMap::new(),
        };
        AgentResult::Record(RecordResult {
            type_name: type_name.into(),
            fields,
            display: None,
        })
    }

    /// 限流标记（与网关约定的 `{"status": "throttled"}` 线格式一致）
    pub fn throttle_marker(message: Option<&str>) -> Self {
        let mut map = FieldMap::new();
        map.insert("status".into(), Value::String("throttled".into()));
        if let Some(message) = message {
            map.insert("response".into(), Value::String(message.to_string()));
        }
        AgentResult::Json(Value::Object(map))
    }
}

impl From<String> for AgentResult {
    fn from(s: String) -> Self {
        AgentResult::Text(s)
    }
}

impl From<&str> for AgentResult {
    fn from(s: &str) -> Self {
        AgentResult::Text(s.to_string())
    }
}

impl From<Value> for AgentResult {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => AgentResult::Empty,
            other => AgentResult::Json(other),
        }
    }
}

impl<T: Into<AgentResult>> From<Option<T>> for AgentResult {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(AgentResult::Empty)
    }
}

impl From<SummaryResult> for AgentResult {
    fn from(s: SummaryResult) -> Self {
        AgentResult::Summary(s)
    }
}

impl From<GraphQueryResult> for AgentResult {
    fn from(g: GraphQueryResult) -> Self {
        AgentResult::Graph(g)
    }
}
