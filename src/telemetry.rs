//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了日志和链路追踪的初始化。

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// 初始化日志和链路追踪
///
/// 应在程序启动时调用一次。日志级别由 `RUST_LOG` 控制，未设置时使用 `default_filter`。
/// 没有配置导出器时 OpenTelemetry 层只在进程内生成span。
///
/// # 参数
///
/// * `service_name` - 服务名称
/// * `default_filter` - 默认日志过滤规则，例如 "info" 或 "feedcache=debug"
pub fn init_tracing(service_name: &str, default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let provider = SdkTracerProvider::builder().build();
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name.to_string());
    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    let subscriber = Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(telemetry);

    // 已有全局subscriber时（例如测试中重复调用）保持原样
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 关闭全局 tracer provider
pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
}
