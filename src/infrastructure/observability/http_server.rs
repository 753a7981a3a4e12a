//! HTTP Observability Server
//!
//! 提供Prometheus metrics和健康检查端点
//!
//! ## 端点
//! - `GET /metrics` - Prometheus格式的指标
//! - `GET /health` - 域状态与批次统计
//! - `GET /health/ready` - 两个域都在运行
//! - `GET /health/live` - 进程存活
//!
//! ## 使用示例
//! ```rust,ignore
//! let server = ObservabilityServer::new(9090);
//! tokio::spawn(server.run());
//! ```

use super::health::{HealthChecker, HealthDetails, HealthStatus};
use crate::shared::metrics::METRICS;
use crate::shared::protocol::BatchType;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// 可观测性服务器
pub struct ObservabilityServer {
    addr: SocketAddr,
    health_checker: Arc<HealthChecker>,
}

impl ObservabilityServer {
    /// 创建新的可观测性服务器
    pub fn new(port: u16) -> Self {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        Self {
            addr,
            health_checker: Arc::new(HealthChecker::new(env!("CARGO_PKG_VERSION"))),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// 域服务通过它上报运行状态
    pub fn health_checker(&self) -> Arc<HealthChecker> {
        self.health_checker.clone()
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/health/live", get(liveness_handler))
            .with_state(self.health_checker.clone())
    }

    /// 启动HTTP服务器
    pub async fn run(self) -> std::io::Result<()> {
        let app = self.router();

        info!("可观测性服务器启动于 {}", self.addr);
        info!("Metrics端点: http://{}/metrics", self.addr);
        info!("健康检查端点: http://{}/health", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await
    }
}

/// 从全局指标汇总批次统计
pub fn collect_details() -> HealthDetails {
    let fired = |t: BatchType| {
        METRICS
            .batches_fired_total
            .with_label_values(&[t.as_str()])
            .get() as u64
    };
    let settled = |t: BatchType| {
        METRICS
            .batches_settled_total
            .with_label_values(&[t.as_str()])
            .get() as u64
    };
    let open = |t: BatchType| {
        METRICS
            .open_batch_amount
            .with_label_values(&[t.as_str()])
            .get()
    };

    HealthDetails {
        deposit_batches_fired: fired(BatchType::Deposit),
        sell_batches_fired: fired(BatchType::Sell),
        deposit_batches_settled: settled(BatchType::Deposit),
        sell_batches_settled: settled(BatchType::Sell),
        open_deposit_amount: open(BatchType::Deposit),
        open_sell_amount: open(BatchType::Sell),
    }
}

/// Prometheus metrics端点
async fn metrics_handler() -> Response {
    let metrics = METRICS.export();
    (StatusCode::OK, metrics).into_response()
}

async fn health_handler(State(checker): State<Arc<HealthChecker>>) -> Response {
    let response = checker.report(Some(collect_details()));

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response)).into_response()
}

/// readiness probe
async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> Response {
    if checker.check_readiness() {
        StatusCode::OK.into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

/// liveness probe
async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> Response {
    if checker.check_liveness() {
        StatusCode::OK.into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}
