//! 网关错误分类
//!
//! 五类错误全部在本层内部消化：准入层转成 Throttled / Failure，归一化层转成兜底文案，
//! 任何一类都不会以错误的形式越过本层边界。

use std::time::Duration;

use thiserror::Error;

use crate::response::Situation;

/// 本层内部的错误分类
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    /// 队列已满或达到并发上限
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// 排队或执行超出调用方给定的时限
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Agent 调用失败（返回错误或 panic）
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    /// 结果形状无法识别
    #[error("Malformed result ({0})")]
    MalformedResult(Situation),

    /// 没有可用的字符串表示
    #[error("Conversion failure ({0})")]
    ConversionFailure(Situation),
}

impl GateError {
    /// 对应的兜底场景标签（仅用于日志与统计）
    pub fn situation(&self) -> Situation {
        match self {
            GateError::CapacityExceeded(_) => Situation::Throttled,
            GateError::Timeout(_) => Situation::Timeout,
            GateError::UpstreamFailure(_) => Situation::UpstreamFailure,
            GateError::MalformedResult(s) | GateError::ConversionFailure(s) => *s,
        }
    }
}

impl From<crate::agent::AgentError> for GateError {
    fn from(err: crate::agent::AgentError) -> Self {
        GateError::UpstreamFailure(err.to_string())
    }
}
