//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存与秒杀流程的指标收集功能。

use dashmap::DashMap;
use lazy_static::lazy_static;
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集和存储运行时指标
#[derive(Debug, Default)]
pub struct Metrics {
    /// 请求计数
    /// key: "service:component:op:result"
    pub requests_total: DashMap<String, u64>,
    /// 操作耗时（累积时间和计数）
    /// key: "service:component:op" -> (total_duration_secs, count)
    pub operation_duration: DashMap<String, (f64, u64)>,
    /// 瞬时值，如订单队列长度、死信数量
    /// key: "service:name"
    pub gauges: DashMap<String, i64>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

impl Metrics {
    /// 记录请求指标
    ///
    /// # 参数
    ///
    /// * `service` - 服务名称
    /// * `component` - 组件（cache/seckill/order）
    /// * `op` - 操作（pass_through/mutex/logical_expire/reserve/commit）
    /// * `result` - 结果（hit/miss/empty/stale/rebuild/accepted/...）
    pub fn record_request(&self, service: &str, component: &str, op: &str, result: &str) {
        let span = span!(Level::TRACE, "metric", service, component, op, result);
        let _enter = span.enter();
        let key = format!("{}:{}:{}:{}", service, component, op, result);
        *self.requests_total.entry(key).or_insert(0) += 1;
    }

    /// 读取某个请求计数，不存在时为0
    pub fn request_count(&self, service: &str, component: &str, op: &str, result: &str) -> u64 {
        let key = format!("{}:{}:{}:{}", service, component, op, result);
        self.requests_total.get(&key).map(|v| *v).unwrap_or(0)
    }

    /// 记录操作耗时
    pub fn record_duration(&self, service: &str, component: &str, op: &str, duration_secs: f64) {
        let key = format!("{}:{}:{}", service, component, op);
        let mut entry = self.operation_duration.entry(key).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    /// 设置瞬时值
    pub fn set_gauge(&self, service: &str, name: &str, value: i64) {
        self.gauges.insert(format!("{}:{}", service, name), value);
    }

    pub fn gauge(&self, service: &str, name: &str) -> Option<i64> {
        self.gauges.get(&format!("{}:{}", service, name)).map(|v| *v)
    }

    /// 清空所有指标
    pub fn reset(&self) {
        self.requests_total.clear();
        self.operation_duration.clear();
        self.gauges.clear();
    }
}

/// 获取指标字符串
///
/// 将所有指标格式化为Prometheus文本格式，按键排序
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let mut lines = Vec::new();

    for item in metrics.requests_total.iter() {
        let parts: Vec<&str> = item.key().splitn(4, ':').collect();
        if let [service, component, op, result] = parts.as_slice() {
            lines.push(format!(
                "oxseckill_requests_total{{service=\"{}\", component=\"{}\", op=\"{}\", result=\"{}\"}} {}",
                service, component, op, result, item.value()
            ));
        }
    }
    for item in metrics.operation_duration.iter() {
        let parts: Vec<&str> = item.key().splitn(3, ':').collect();
        if let [service, component, op] = parts.as_slice() {
            let (total, count) = *item.value();
            lines.push(format!(
                "oxseckill_operation_duration_seconds_sum{{service=\"{}\", component=\"{}\", op=\"{}\"}} {}",
                service, component, op, total
            ));
            lines.push(format!(
                "oxseckill_operation_duration_seconds_count{{service=\"{}\", component=\"{}\", op=\"{}\"}} {}",
                service, component, op, count
            ));
        }
    }
    for item in metrics.gauges.iter() {
        if let Some((service, name)) = item.key().split_once(':') {
            lines.push(format!(
                "oxseckill_{}{{service=\"{}\"}} {}",
                name,
                service,
                item.value()
            ));
        }
    }

    lines.sort();
    let mut output = lines.join("\n");
    if !output.is_empty() {
        output.push('\n');
    }
    output
}
