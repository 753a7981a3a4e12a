//! Health Check
//!
//! 汇总两个域服务的运行状态，供 `/health` 系列端点使用
//!
//! 状态规则：
//! - 记录过致命错误 → `unhealthy`
//! - 所有已登记的域都在运行 → `healthy`
//! - 部分域停止 → `degraded`，全部停止 → `unhealthy`
//!
//! ## 响应格式
//! ```json
//! {
//!   "status": "degraded",
//!   "uptime_seconds": 42,
//!   "version": "0.1.0",
//!   "timestamp": 1234567890,
//!   "domains": [{ "domain": "Child", "running": true }, { "domain": "Root", "running": false }]
//! }
//! ```

use crate::shared::protocol::Domain;
use crate::shared::timestamp::now_secs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// 部分域不可用
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainHealth {
    pub domain: Domain,
    pub running: bool,
}

/// 批次统计（来自全局指标）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthDetails {
    pub deposit_batches_fired: u64,
    pub sell_batches_fired: u64,
    pub deposit_batches_settled: u64,
    pub sell_batches_settled: u64,
    /// 当前开放存款批次的累计金额
    pub open_deposit_amount: f64,
    /// 当前开放卖出批次的累计金额
    pub open_sell_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
    pub version: String,
    pub timestamp: u64,
    pub domains: Vec<DomainHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

pub struct HealthChecker {
    started: Instant,
    version: String,
    domains: RwLock<Vec<DomainHealth>>,
    fault: RwLock<Option<String>>,
}

impl HealthChecker {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            started: Instant::now(),
            version: version.into(),
            domains: RwLock::new(Vec::new()),
            fault: RwLock::new(None),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// 登记或更新一个域服务的运行状态
    pub fn set_running(&self, domain: Domain, running: bool) {
        let mut domains = self.domains.write();
        match domains.iter_mut().find(|d| d.domain == domain) {
            Some(entry) => entry.running = running,
            None => domains.push(DomainHealth { domain, running }),
        }
    }

    /// 记录致命错误，此后状态恒为 unhealthy
    pub fn fail(&self, reason: impl Into<String>) {
        *self.fault.write() = Some(reason.into());
    }

    pub fn status(&self) -> HealthStatus {
        if self.fault.read().is_some() {
            return HealthStatus::Unhealthy;
        }

        let domains = self.domains.read();
        let running = domains.iter().filter(|d| d.running).count();
        if running == domains.len() {
            HealthStatus::Healthy
        } else if running == 0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        }
    }

    pub fn report(&self, details: Option<HealthDetails>) -> HealthResponse {
        HealthResponse {
            status: self.status(),
            uptime_seconds: self.uptime_seconds(),
            version: self.version.clone(),
            timestamp: now_secs(),
            domains: self.domains.read().clone(),
            fault: self.fault.read().clone(),
            details,
        }
    }

    /// 进程能响应即存活
    pub fn check_liveness(&self) -> bool {
        true
    }

    pub fn check_readiness(&self) -> bool {
        self.status() == HealthStatus::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_domains() {
        let checker = HealthChecker::new("1.0.0");
        assert_eq!(checker.status(), HealthStatus::Healthy);

        checker.set_running(Domain::Child, true);
        checker.set_running(Domain::Root, true);
        assert!(checker.check_readiness());

        checker.set_running(Domain::Root, false);
        assert_eq!(checker.status(), HealthStatus::Degraded);
        assert!(!checker.check_readiness());

        checker.set_running(Domain::Child, false);
        assert_eq!(checker.status(), HealthStatus::Unhealthy);

        checker.set_running(Domain::Child, true);
        checker.set_running(Domain::Root, true);
        assert_eq!(checker.status(), HealthStatus::Healthy);
        assert_eq!(checker.report(None).domains.len(), 2);
    }

    #[test]
    fn test_fault_is_sticky() {
        let checker = HealthChecker::new("1.0.0");
        checker.set_running(Domain::Child, true);
        checker.fail("timed out waiting for root");
        checker.set_running(Domain::Child, true);

        let response = checker.report(None);
        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(response.fault.as_deref(), Some("timed out waiting for root"));
        // 存活检查不受状态影响
        assert!(checker.check_liveness());
    }

    #[test]
    fn test_report_serialization() {
        let checker = HealthChecker::new("1.0.0");
        checker.set_running(Domain::Root, true);
        let response = checker.report(Some(HealthDetails {
            deposit_batches_fired: 3,
            open_deposit_amount: 450.0,
            ..Default::default()
        }));

        assert_eq!(response.version, "1.0.0");
        assert!(response.timestamp > 0);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"deposit_batches_fired\":3"));
        assert!(!json.contains("fault"));
    }
}
