//! 核心层：错误、请求状态、优先级队列、准入控制

pub mod admission;
pub mod error;
pub mod state;
pub mod task_scheduler;

pub use admission::{
    AdmissionConfig, AdmissionController, AdmissionStats, Outcome, Request, ThrottleCause,
};
pub use error::GateError;
pub use state::RequestState;
pub use task_scheduler::{PendingQueue, Priority, QueueEntry, RequestId};
