//! Agent 调用抽象
//!
//! 聊天路由、知识图谱、代码 Agent 等都实现 AgentCallable；准入层把它们当黑盒调用，
//! 返回值统一为封闭的 AgentResult。

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::result::AgentResult;

/// Agent 调用参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentArgs {
    pub query: String,
    /// 指定模型，None 表示由 Agent 自行决定
    #[serde(default)]
    pub model: Option<String>,
    /// 其余透传参数
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AgentArgs {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Agent 调用失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Agent failed: {0}")]
    Failed(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Agent call cancelled")]
    Cancelled,
}

/// 可被准入层调度的 Agent
#[async_trait]
pub trait AgentCallable: Send + Sync {
    async fn call(&self, user_id: &str, args: &AgentArgs) -> Result<AgentResult, AgentError>;

    /// Agent 名称（用于日志）
    fn name(&self) -> &str {
        "agent"
    }
}

/// 闭包适配器：把 `Fn(user_id, args) -> Future` 包装成 AgentCallable
pub struct FnAgent<F> {
    name: String,
    f: F,
}

impl<F> FnAgent<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> AgentCallable for FnAgent<F>
where
    F: Fn(String, AgentArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AgentResult, AgentError>> + Send + 'static,
{
    async fn call(&self, user_id: &str, args: &AgentArgs) -> Result<AgentResult, AgentError> {
        (self.f)(user_id.to_string(), args.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
