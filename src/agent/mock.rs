//! Mock Agent（用于测试与演示，无需真实推理后端）
//!
//! 延迟一段时间后把用户问题包装成 `{"response": ...}` 返回，模拟后端耗时。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{AgentArgs, AgentCallable, AgentError, AgentResult};

/// Mock 回复形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockShape {
    /// `{"response": "Echo: ..."}`
    #[default]
    Mapping,
    /// 纯文本
    Text,
    /// 什么都不返回
    Empty,
    /// 返回调用失败
    Fail,
}

/// Mock Agent：回显用户问题
#[derive(Debug, Clone, Default)]
pub struct MockAgent {
    delay: Duration,
    shape: MockShape,
}

impl MockAgent {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            shape: MockShape::Mapping,
        }
    }

    pub fn with_shape(mut self, shape: MockShape) -> Self {
        self.shape = shape;
        self
    }
}

#[async_trait]
impl AgentCallable for MockAgent {
    async fn call(&self, _user_id: &str, args: &AgentArgs) -> Result<AgentResult, AgentError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let query = if args.query.trim().is_empty() {
            "(no input)"
        } else {
            args.query.as_str()
        };

        match self.shape {
            MockShape::Mapping => Ok(AgentResult::Json(json!({
                "response": format!("Echo from Mock: {query}")
            }))),
            MockShape::Text => Ok(AgentResult::Text(format!("Echo from Mock: {query}"))),
            MockShape::Empty => Ok(AgentResult::Empty),
            MockShape::Fail => Err(AgentError::Unavailable("mock backend offline".into())),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
