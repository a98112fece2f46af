// 日志初始化

use tracing_subscriber::EnvFilter;

/// 安装全局 tracing 订阅者
///
/// 可以通过 RUST_LOG 环境变量控制日志级别，例如 `RUST_LOG=debug`。
/// 已经安装过订阅者时返回错误，调用方可以忽略。
pub fn init_logging() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(false) // 不显示 target（模块路径）
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}
