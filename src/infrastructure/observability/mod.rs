//! Observability
//!
//! Prometheus 指标导出，以及反映两个域服务状态的健康检查端点。

pub mod health;
pub mod http_server;

pub use health::{DomainHealth, HealthChecker, HealthDetails, HealthResponse, HealthStatus};
pub use http_server::{collect_details, ObservabilityServer};
