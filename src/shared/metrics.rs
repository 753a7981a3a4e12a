//! Prometheus Metrics Module
//!
//! 批次结算流程的核心指标
//!
//! ## 指标类型
//! - **Counter**: 存款/卖出请求、批次触发/处理/结算、隧道消息、错误、未分配余量
//! - **Gauge**: 当前开放批次的累计金额
//!
//! ## 使用示例
//! ```rust,ignore
//! use transaction_batcher::shared::metrics::METRICS;
//!
//! METRICS.batches_fired_total.with_label_values(&["deposit"]).inc();
//! ```

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};

lazy_static! {
    /// 全局Metrics实例
    pub static ref METRICS: Metrics = Metrics::new();
}

/// 结算流程核心指标
pub struct Metrics {
    /// 存款请求总数 (按组合)
    pub deposits_total: CounterVec,

    /// 卖出请求总数
    pub sell_requests_total: CounterVec,

    /// 批次触发总数 (deposit/sell)
    pub batches_fired_total: CounterVec,

    /// 批次处理总数 (按域、批次类型)
    pub batches_processed_total: CounterVec,

    /// 批次结算总数 (distribute/retrieve)
    pub batches_settled_total: CounterVec,

    /// 隧道消息总数 (按方向、域)
    pub tunnel_messages_total: CounterVec,

    /// 被拒绝的入站消息 (按域、原因)
    pub rejected_messages_total: CounterVec,

    /// 错误总数 (按域、错误类别)
    pub errors_total: CounterVec,

    /// 向下取整后未分配的余量
    pub undistributed_dust_total: CounterVec,

    /// 当前开放批次的累计金额
    pub open_batch_amount: GaugeVec,
}

impl Metrics {
    /// 创建新的Metrics实例
    pub fn new() -> Self {
        Self {
            deposits_total: register_counter_vec!(
                "batcher_deposits_total",
                "Total number of accepted deposits",
                &["portfolio"]
            )
            .expect("register batcher_deposits_total"),

            sell_requests_total: register_counter_vec!(
                "batcher_sell_requests_total",
                "Total number of accepted sell requests",
                &["domain"]
            )
            .expect("register batcher_sell_requests_total"),

            batches_fired_total: register_counter_vec!(
                "batcher_batches_fired_total",
                "Total number of batches fired across the tunnel",
                &["batch_type"]
            )
            .expect("register batcher_batches_fired_total"),

            batches_processed_total: register_counter_vec!(
                "batcher_batches_processed_total",
                "Total number of batches processed from inbound messages",
                &["domain", "batch_type"]
            )
            .expect("register batcher_batches_processed_total"),

            batches_settled_total: register_counter_vec!(
                "batcher_batches_settled_total",
                "Total number of batches distributed or retrieved",
                &["batch_type"]
            )
            .expect("register batcher_batches_settled_total"),

            tunnel_messages_total: register_counter_vec!(
                "batcher_tunnel_messages_total",
                "Total number of tunnel messages",
                &["direction", "domain"]
            )
            .expect("register batcher_tunnel_messages_total"),

            rejected_messages_total: register_counter_vec!(
                "batcher_rejected_messages_total",
                "Inbound tunnel messages rejected by the replay or sender guards",
                &["domain", "reason"]
            )
            .expect("register batcher_rejected_messages_total"),

            errors_total: register_counter_vec!(
                "batcher_errors_total",
                "Total number of failed operations",
                &["domain", "kind"]
            )
            .expect("register batcher_errors_total"),

            undistributed_dust_total: register_counter_vec!(
                "batcher_undistributed_dust_total",
                "Units left in custody by floor rounding",
                &["batch_type"]
            )
            .expect("register batcher_undistributed_dust_total"),

            open_batch_amount: register_gauge_vec!(
                "batcher_open_batch_amount",
                "Aggregate amount recorded against the open batch",
                &["batch_type"]
            )
            .expect("register batcher_open_batch_amount"),
        }
    }

    /// 导出Prometheus格式的指标
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("指标编码失败: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_global() {
        METRICS.batches_fired_total.with_label_values(&["deposit"]).inc();

        let output = METRICS.export();
        assert!(output.contains("batcher_batches_fired_total"));
    }

    #[test]
    fn test_gauge_global() {
        METRICS.open_batch_amount.with_label_values(&["sell"]).set(160.0);

        // 全局共享，不假设值精确匹配
        let output = METRICS.export();
        assert!(output.contains("batcher_open_batch_amount"));
    }
}
