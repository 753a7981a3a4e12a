/// Network bootstrap
///
/// Wires a child batcher and a root router over one in-memory tunnel, then
/// registers portfolios, protocols and weights on both sides from a `Setup`.

use crate::application::batcher::{BatcherConfig, ChildBatcher};
use crate::application::router::{RootRouter, RouterConfig, RouterWiring};
use crate::application::services::{
    BatcherHandle, BatcherService, BatcherServiceConfig, RouterHandle, RouterService,
    RouterServiceConfig, ServiceError,
};
use crate::infrastructure::ledger::InMemoryLedger;
use crate::infrastructure::protocols::InMemoryProtocol;
use crate::infrastructure::tunnel::{InMemoryTunnel, Tunnel};
use crate::interfaces::cli::setup::Setup;
use crate::shared::protocol::{AccountId, Domain, TokenId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// 根域托管账户，持有协议仓位
pub const ROOT_CUSTODY: &str = "root-custody";

#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchOptions {
    /// 隧道对每帧重复投递
    pub duplicate_delivery: bool,
    /// 根域处理完成后自动回传
    pub auto_relay: bool,
    /// 子域收到回传后自动分发/赎回
    pub auto_settle: bool,
}

/// Both domains, running
pub struct Network {
    pub batcher: BatcherHandle,
    pub router: RouterHandle,
    pub ledger: InMemoryLedger,
    pub tunnel: InMemoryTunnel,
    pub protocols: Vec<Arc<InMemoryProtocol>>,
    pub base_asset: TokenId,
    pub tokens: Vec<TokenId>,
    pub admin: AccountId,
    pub operator: AccountId,
    pub custody: AccountId,
    tasks: Vec<JoinHandle<()>>,
}

impl Network {
    pub async fn launch(setup: &Setup, options: LaunchOptions) -> Result<Self, ServiceError> {
        let tunnel = InMemoryTunnel::new().with_duplicate_delivery(options.duplicate_delivery);
        let child_inbox = tunnel.attach(Domain::Child);
        let root_inbox = tunnel.attach(Domain::Root);
        let ledger = InMemoryLedger::new();
        let shared_tunnel: Arc<dyn Tunnel> = Arc::new(tunnel.clone());

        let batcher_config = BatcherConfig {
            base_asset: TokenId::new(setup.base_asset.as_str()),
            ..BatcherConfig::default()
        };
        let admin = batcher_config.admin.clone();
        let operator = batcher_config.operator.clone();
        let custody = batcher_config.custody.clone();
        let wiring = RouterWiring {
            batcher: batcher_config.endpoint.clone(),
            bridge: batcher_config.root_endpoint.clone(),
            custody: AccountId::new(ROOT_CUSTODY),
        };
        let router_config = RouterConfig {
            admin: admin.clone(),
            operator: operator.clone(),
            ..RouterConfig::default()
        };

        let (batcher, batcher_task) = BatcherService::spawn(
            ChildBatcher::new(batcher_config, ledger.clone(), shared_tunnel.clone()),
            child_inbox,
            BatcherServiceConfig {
                auto_settle: options.auto_settle,
                ..Default::default()
            },
        );
        let (router, router_task) = RouterService::spawn(
            RootRouter::new(router_config),
            root_inbox,
            RouterServiceConfig {
                auto_relay: options.auto_relay,
                ..Default::default()
            },
        );

        router.init(&admin, wiring).await?;
        router.set_tunnel(&admin, shared_tunnel).await?;

        let mut protocols = Vec::with_capacity(setup.protocols.len());
        let mut tokens = Vec::with_capacity(setup.protocols.len());
        for p in &setup.protocols {
            let protocol = Arc::new(InMemoryProtocol::new(p.name.as_str(), p.rate_bps));
            router.add_protocol(&admin, protocol.clone()).await?;
            let token = TokenId::new(p.token.as_str());
            batcher.add_protocol_token(&admin, &p.name, token.clone()).await?;
            protocols.push(protocol);
            tokens.push(token);
        }

        for p in &setup.portfolios {
            let index = router.add_portfolio(&admin, &p.name).await?;
            router
                .set_portfolio_weights(&admin, index, p.weights.clone())
                .await?;
            batcher.add_portfolio(&admin, &p.name).await?;
        }

        info!(
            portfolios = setup.portfolios.len(),
            protocols = setup.protocols.len(),
            duplicate_delivery = options.duplicate_delivery,
            "settlement network launched"
        );

        Ok(Self {
            batcher,
            router,
            ledger,
            tunnel,
            protocols,
            base_asset: TokenId::new(setup.base_asset.as_str()),
            tokens,
            admin,
            operator,
            custody,
            tasks: vec![batcher_task, router_task],
        })
    }

    /// Drops both handles and waits for the actors to exit.
    pub async fn shutdown(self) {
        let Network { batcher, router, tasks, .. } = self;
        drop(batcher);
        drop(router);
        for task in tasks {
            let _ = task.await;
        }
        info!("settlement network stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_launch_registers_both_domains() {
        let network = Network::launch(&Setup::default(), LaunchOptions::default())
            .await
            .unwrap();

        let child = network.batcher.snapshot().await.unwrap();
        assert_eq!(child.portfolios.len(), 3);
        assert_eq!(child.tokens.len(), 2);

        let root = network.router.snapshot().await.unwrap();
        assert_eq!(root.protocols, vec!["Idle RA".to_string(), "Idle BY".to_string()]);
        assert_eq!(root.portfolios[2].weights, vec![1000, 3000]);

        network.shutdown().await;
    }
}
