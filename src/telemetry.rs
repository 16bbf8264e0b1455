//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了日志与链路追踪的初始化。

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// 默认日志过滤规则
pub const DEFAULT_FILTER: &str = "info";

/// 初始化 tracing subscriber 和 OpenTelemetry tracer
///
/// 应在应用启动时调用一次。`filter` 为空时优先读取 `RUST_LOG`，
/// 再退回 [`DEFAULT_FILTER`]。重复调用不会覆盖已安装的 subscriber。
///
/// # 参数
///
/// * `service_name` - 服务名称，用作 tracer 名称
/// * `filter` - 日志过滤规则，例如 `"oxseckill=debug,info"`
pub fn init_tracing(service_name: &str, filter: Option<&str>) {
    let env_filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    // 未配置导出器，span 只在进程内传播
    let provider = SdkTracerProvider::builder().build();
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name.to_string());

    let result = Registry::default()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init();

    if result.is_ok() {
        tracing::info!("Tracing initialized for service: {}", service_name);
    }
}

/// 关闭全局 tracer provider
pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
}
