/// CLI Interface Module
///
/// This module provides the command-line entry point for the settlement
/// simulator. It launches both domains over an in-memory tunnel, runs a
/// number of randomized deposit/sell rounds, and prints a JSON summary.
///
/// ## Responsibilities
/// - Parse command-line arguments
/// - Load and validate the setup file
/// - Launch and wire both domain services
/// - Optionally expose metrics and health endpoints

pub mod setup;
pub mod simulation;

use crate::application::services::ServiceError;
use crate::infrastructure::observability::ObservabilityServer;
use crate::interfaces::bootstrap::{LaunchOptions, Network};
use crate::shared::protocol::Domain;
use clap::Parser;
use setup::{Setup, SetupError};
use simulation::{Simulation, SimulationConfig, SimulationError};
use std::path::PathBuf;
use std::time::Duration;

/// 批量结算模拟器命令行配置
#[derive(Parser, Debug, Clone)]
#[command(name = "batcher")]
#[command(version)]
#[command(about = "双域批量结算模拟器", long_about = None)]
pub struct CliConfig {
    /// 初始登记文件（JSON），缺省使用内置三组合两协议场景
    #[arg(short, long)]
    pub setup: Option<PathBuf>,

    /// 日志级别
    #[arg(short = 'l', long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: String,

    /// 模拟用户数
    #[arg(short, long, default_value_t = 4)]
    pub users: usize,

    /// 模拟轮数（每轮一个存款批次和一个卖出批次）
    #[arg(short, long, default_value_t = 3)]
    pub rounds: usize,

    /// 随机数种子
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// 可观测性端口（/metrics, /health），缺省不启动
    #[arg(short = 'm', long)]
    pub metrics_port: Option<u16>,

    /// 隧道对每帧重复投递
    #[arg(long, default_value_t = false)]
    pub duplicate_delivery: bool,

    /// 根域处理完成后自动回传（false 时由运营者手动回传）
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_relay: bool,

    /// 等待回传的超时（毫秒）
    #[arg(long, default_value_t = 5_000)]
    pub timeout_ms: u64,

    /// 仅显示配置不运行模拟（用于调试）
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error("failed to render summary: {0}")]
    Render(#[from] serde_json::Error),

    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

/// Runs the CLI application
pub async fn run() -> Result<(), CliError> {
    let config = CliConfig::parse();

    init_logging(&config.log_level);

    tracing::info!("批量结算模拟器启动");
    tracing::info!("配置: {:?}", config);

    let setup = match &config.setup {
        Some(path) => Setup::load(path)?,
        None => Setup::default(),
    };

    println!("========================================");
    println!("  双域批量结算模拟器 v{}", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!("基础资产:     {}", setup.base_asset);
    println!("组合数量:     {}", setup.portfolios.len());
    println!("协议数量:     {}", setup.protocols.len());
    println!("用户/轮数:    {} / {}", config.users, config.rounds);
    println!("随机种子:     {}", config.seed);
    println!("重复投递:     {}", if config.duplicate_delivery { "启用" } else { "禁用" });
    println!("自动回传:     {}", if config.auto_relay { "启用" } else { "禁用" });
    println!("========================================");

    if config.dry_run {
        println!("\nDry-run 模式 - 不运行模拟");
        println!("{}", serde_json::to_string_pretty(&setup)?);
        return Ok(());
    }

    let health = config.metrics_port.map(|port| {
        let server = ObservabilityServer::new(port);
        let health = server.health_checker();
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "可观测性服务器退出");
            }
        });
        health
    });

    let network = Network::launch(
        &setup,
        LaunchOptions {
            duplicate_delivery: config.duplicate_delivery,
            auto_relay: config.auto_relay,
            auto_settle: false,
        },
    )
    .await?;
    if let Some(health) = &health {
        health.set_running(Domain::Child, true);
        health.set_running(Domain::Root, true);
    }

    let simulation = Simulation::new(
        &network,
        SimulationConfig {
            users: config.users,
            rounds: config.rounds,
            seed: config.seed,
            auto_relay: config.auto_relay,
            event_timeout: Duration::from_millis(config.timeout_ms),
        },
    );
    simulation.fund_users(u128::from(setup.initial_balance))?;

    let summary = match simulation.run().await {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(health) = &health {
                health.fail(e.to_string());
            }
            return Err(e.into());
        }
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if health.is_some() {
        tracing::info!("模拟完成，按 Ctrl-C 退出");
        tokio::signal::ctrl_c().await?;
    }

    network.shutdown().await;
    if let Some(health) = &health {
        health.set_running(Domain::Child, false);
        health.set_running(Domain::Root, false);
    }
    Ok(())
}

/// 初始化日志系统
fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_config_default() {
        let config = CliConfig::parse_from(["batcher"]);
        assert!(config.setup.is_none());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.users, 4);
        assert_eq!(config.rounds, 3);
        assert_eq!(config.seed, 42);
        assert!(config.metrics_port.is_none());
        assert!(!config.duplicate_delivery);
        assert!(config.auto_relay);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_cli_config_custom() {
        let config = CliConfig::parse_from([
            "batcher",
            "--setup", "setup.json",
            "--log-level", "debug",
            "--users", "10",
            "--rounds", "5",
            "--seed", "7",
            "--metrics-port", "9090",
            "--duplicate-delivery",
            "--auto-relay", "false",
            "--dry-run",
        ]);

        assert_eq!(config.setup, Some(PathBuf::from("setup.json")));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.users, 10);
        assert_eq!(config.rounds, 5);
        assert_eq!(config.seed, 7);
        assert_eq!(config.metrics_port, Some(9090));
        assert!(config.duplicate_delivery);
        assert!(!config.auto_relay);
        assert!(config.dry_run);
    }

    #[test]
    fn test_cli_config_short_flags() {
        let config = CliConfig::parse_from([
            "batcher",
            "-s", "net.json",
            "-u", "2",
            "-r", "1",
            "-m", "9100",
            "-l", "warn",
        ]);

        assert_eq!(config.setup, Some(PathBuf::from("net.json")));
        assert_eq!(config.users, 2);
        assert_eq!(config.rounds, 1);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_cli_rejects_unknown_log_level() {
        assert!(CliConfig::try_parse_from(["batcher", "--log-level", "loud"]).is_err());
    }
}
