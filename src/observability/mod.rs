//! 可观测性：日志订阅器与进度报告

pub mod report;

pub use report::render_markdown;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局日志订阅器；默认 info（debug=true 时为 debug），RUST_LOG 优先
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // 测试或嵌入方可能已装过订阅器
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
