//! Agent 边界：调用抽象、封闭结果类型、Mock 实现

pub mod mock;
pub mod result;
pub mod traits;

pub use mock::{MockAgent, MockShape};
pub use result::{AgentResult, FieldMap, GraphQueryResult, OpaqueResult, RecordResult, SummaryResult};
pub use traits::{AgentArgs, AgentCallable, AgentError, FnAgent};
