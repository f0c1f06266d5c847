//! 可观测性：tracing 订阅器初始化
//!
//! 默认 info，可通过 RUST_LOG 覆盖（如 `RUST_LOG=modelgate=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    init_with_filter("info");
}

/// 以指定的默认指令初始化；RUST_LOG 存在时优先。重复调用不会 panic
pub fn init_with_filter(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
