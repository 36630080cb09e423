//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Feed缓存系统的指标收集功能。

use lazy_static::lazy_static;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{span, Level};

/// 指标收集器
///
/// 进程内唯一的全局状态；指标只用于观测，不参与任何业务判断
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 操作计数
    /// key: "component:op:result"
    pub requests_total: Arc<Mutex<BTreeMap<String, u64>>>,
    /// 操作耗时
    /// key: "component:op" -> (total_duration_secs, count)
    pub operation_duration: Arc<Mutex<BTreeMap<String, (f64, u64)>>>,
    /// 队列深度
    pub queue_depth: Arc<Mutex<BTreeMap<String, usize>>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

// 计数器被毒化时沿用已有数据
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Metrics {
    /// 记录一次操作
    ///
    /// # 参数
    ///
    /// * `component` - 组件名称（post_cache/feed_index/fanout/heat）
    /// * `op` - 操作类型
    /// * `result` - 操作结果（hit/miss/ok/error 等）
    pub fn record_request(&self, component: &str, op: &str, result: &str) {
        let span = span!(Level::TRACE, "feed_metric", component, op, result);
        let _enter = span.enter();
        let key = format!("{}:{}:{}", component, op, result);
        *lock(&self.requests_total).entry(key).or_insert(0) += 1;
    }

    /// 记录操作耗时
    pub fn record_duration(&self, component: &str, op: &str, duration_secs: f64) {
        let key = format!("{}:{}", component, op);
        let mut map = lock(&self.operation_duration);
        let entry = map.entry(key).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    /// 设置队列深度
    pub fn set_queue_depth(&self, queue: &str, depth: usize) {
        lock(&self.queue_depth).insert(queue.to_string(), depth);
    }

    /// 读取某个计数
    pub fn request_count(&self, component: &str, op: &str, result: &str) -> u64 {
        let key = format!("{}:{}:{}", component, op, result);
        lock(&self.requests_total).get(&key).copied().unwrap_or(0)
    }
}

/// 获取指标字符串
///
/// 将所有指标格式化为Prometheus文本格式
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let mut output = String::new();

    for (k, v) in lock(&metrics.requests_total).iter() {
        let parts: Vec<&str> = k.splitn(3, ':').collect();
        if let [component, op, result] = parts.as_slice() {
            output.push_str(&format!(
                "feedcache_operations_total{{component=\"{}\", op=\"{}\", result=\"{}\"}} {}\n",
                component, op, result, v
            ));
        }
    }
    for (k, (total, count)) in lock(&metrics.operation_duration).iter() {
        if let Some((component, op)) = k.split_once(':') {
            output.push_str(&format!(
                "feedcache_operation_duration_seconds_sum{{component=\"{}\", op=\"{}\"}} {}\n",
                component, op, total
            ));
            output.push_str(&format!(
                "feedcache_operation_duration_seconds_count{{component=\"{}\", op=\"{}\"}} {}\n",
                component, op, count
            ));
        }
    }
    for (k, v) in lock(&metrics.queue_depth).iter() {
        output.push_str(&format!("feedcache_queue_depth{{queue=\"{}\"}} {}\n", k, v));
    }
    output
}
