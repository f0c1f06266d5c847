//! 回复层：原始对象检测、兜底文案生成、回复归一化
//!
//! 本层全部是纯同步函数：不阻塞、不触碰共享可变状态、不会失败。

pub mod detector;
pub mod fallback;
pub mod mood;
pub mod normalizer;
pub mod situation;
pub mod templates;

pub use detector::{is_presentable, looks_raw};
pub use fallback::{FallbackGenerator, FallbackSettings, DEFAULT_THROTTLE_MESSAGE, FINAL_FALLBACK};
pub use mood::{MoodBucket, MoodContext};
pub use normalizer::{normalize, normalize_outcome, ResponseNormalizer};
pub use situation::{Situation, SituationCategory};
pub use templates::Intent;
