//! modelgate - 共享推理后端的准入控制与回复归一化
//!
//! 模块划分：
//! - **agent**: Agent 调用抽象（AgentCallable）、结果形态（AgentResult）与 Mock 实现
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 准入控制器、优先级队列、请求状态与错误类型
//! - **observability**: tracing 初始化
//! - **response**: 原始对象检测、兜底文案生成、回复归一化

pub mod agent;
pub mod config;
pub mod core;
pub mod observability;
pub mod response;

pub use agent::{AgentArgs, AgentCallable, AgentResult, MockAgent};
pub use crate::core::{AdmissionConfig, AdmissionController, GateError, Outcome, Priority, ThrottleCause};
pub use response::{normalize, normalize_outcome, MoodContext, ResponseNormalizer};
