//! Randomized settlement rounds
//!
//! 每轮：用户随机存款 → 运营者触发存款批次 → 等待回传 → 分发；
//! 随后用户随机卖出 → 触发卖出批次 → 等待回传 → 赎回。
//! 随机数由种子确定，相同种子得到相同的汇总。

use crate::application::services::ServiceError;
use crate::domain::error::ErrorKind;
use crate::domain::events::{EventRecord, SettlementEvent};
use crate::domain::ports::{AssetLedger, LedgerError};
use crate::interfaces::bootstrap::Network;
use crate::shared::protocol::{AccountId, Amount, BasisPoints, BatchHandle, BatchType, Domain, BPS_DENOMINATOR};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("timed out waiting for {domain} to process {handle}")]
    Timeout { domain: Domain, handle: BatchHandle },

    #[error("{0} event stream closed")]
    EventsClosed(Domain),

    #[error("batch {0} missing from snapshot")]
    MissingBatch(BatchHandle),
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub users: usize,
    pub rounds: usize,
    pub seed: u64,
    /// 根域是否自动回传
    pub auto_relay: bool,
    pub event_timeout: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            users: 4,
            rounds: 3,
            seed: 42,
            auto_relay: true,
            event_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub handle: String,
    pub contributors: usize,
    pub totals: Vec<Amount>,
    pub result: Vec<Amount>,
    pub dust: Vec<Amount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundSummary {
    pub round: usize,
    pub deposit: BatchSummary,
    pub sell: BatchSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserBalance {
    pub base: Amount,
    pub tokens: Vec<Amount>,
    pub deposited: Amount,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub seed: u64,
    pub users: usize,
    pub rounds: Vec<RoundSummary>,
    pub frames_sent: u64,
    pub balances: BTreeMap<AccountId, UserBalance>,
}

pub struct Simulation<'a> {
    network: &'a Network,
    config: SimulationConfig,
    users: Vec<AccountId>,
    rng: StdRng,
}

impl<'a> Simulation<'a> {
    pub fn new(network: &'a Network, config: SimulationConfig) -> Self {
        let users = (0..config.users)
            .map(|i| AccountId::new(format!("user-{}", i)))
            .collect();
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            network,
            config,
            users,
            rng,
        }
    }

    /// 为每个用户铸造初始余额，并向子域托管授权
    pub fn fund_users(&self, initial_balance: Amount) -> Result<(), SimulationError> {
        let ledger = &self.network.ledger;
        for user in &self.users {
            ledger.mint(&self.network.base_asset, user, initial_balance)?;
            ledger.approve(
                &self.network.base_asset,
                user,
                &self.network.custody,
                Amount::MAX,
            );
            for token in &self.network.tokens {
                ledger.approve(token, user, &self.network.custody, Amount::MAX);
            }
        }
        Ok(())
    }

    pub async fn run(mut self) -> Result<SimulationSummary, SimulationError> {
        let mut rounds = Vec::with_capacity(self.config.rounds);
        for round in 0..self.config.rounds {
            let deposit = self.deposit_round().await?;
            let sell = self.sell_round().await?;
            info!(round, deposit = %deposit.handle, sell = %sell.handle, "round settled");
            rounds.push(RoundSummary {
                round,
                deposit,
                sell,
            });
        }

        let snapshot = self.network.batcher.snapshot().await?;
        let ledger = &self.network.ledger;
        let balances = self
            .users
            .iter()
            .map(|user| {
                let balance = UserBalance {
                    base: ledger.balance_of(&self.network.base_asset, user),
                    tokens: self
                        .network
                        .tokens
                        .iter()
                        .map(|t| ledger.balance_of(t, user))
                        .collect(),
                    deposited: snapshot.deposit_per_user.get(user).copied().unwrap_or(0),
                };
                (user.clone(), balance)
            })
            .collect();

        Ok(SimulationSummary {
            seed: self.config.seed,
            users: self.users.len(),
            rounds,
            frames_sent: self.network.tunnel.frames_sent(),
            balances,
        })
    }

    async fn deposit_round(&mut self) -> Result<BatchSummary, SimulationError> {
        let portfolios = self.network.batcher.snapshot().await?.portfolios.len();
        let base = &self.network.base_asset;

        let mut plan = Vec::new();
        for user in &self.users {
            let balance = self.network.ledger.balance_of(base, user);
            if balance == 0 || !self.rng.gen_bool(0.7) {
                continue;
            }
            let amount = self.rng.gen_range(1..=(balance / 10).max(1));
            let portfolio = self.rng.gen_range(0..portfolios);
            plan.push((user.clone(), amount, portfolio));
        }

        let batcher = &self.network.batcher;
        let results = join_all(
            plan.iter()
                .map(|(user, amount, portfolio)| batcher.deposit(user, *amount, *portfolio)),
        )
        .await;
        for result in results {
            result?;
        }

        let handle = self.fire_and_wait(BatchType::Deposit).await?;
        let allocation = batcher.distribute(&self.network.operator, handle.id).await?;
        self.summarize(handle, allocation.dust).await
    }

    async fn sell_round(&mut self) -> Result<BatchSummary, SimulationError> {
        let width = self.network.tokens.len();

        let mut plan: Vec<(AccountId, Vec<BasisPoints>)> = Vec::new();
        for user in &self.users {
            if !self.rng.gen_bool(0.5) {
                continue;
            }
            let percentages = (0..width)
                .map(|_| self.rng.gen_range(0..=BPS_DENOMINATOR))
                .collect();
            plan.push((user.clone(), percentages));
        }

        let batcher = &self.network.batcher;
        let results = join_all(
            plan.iter()
                .map(|(user, percentages)| batcher.sell(user, percentages.clone())),
        )
        .await;
        for (result, (user, _)) in results.into_iter().zip(&plan) {
            match result {
                Ok(_) => {}
                // 余额为零时卖出量为零
                Err(e) if e.kind() == ErrorKind::Validation => {
                    debug!(%user, error = %e, "sell skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let handle = self.fire_and_wait(BatchType::Sell).await?;
        let allocation = batcher.retrieve(&self.network.operator, handle.id).await?;
        self.summarize(handle, allocation.dust).await
    }

    /// Fires the open batch and returns once the child has applied the
    /// root's response. Relays by hand when the router does not.
    async fn fire_and_wait(&self, batch_type: BatchType) -> Result<BatchHandle, SimulationError> {
        let mut child_events = self.network.batcher.subscribe();
        let mut root_events = self.network.router.subscribe();
        let operator = &self.network.operator;

        let handle = self.network.batcher.execute_batch(operator, batch_type).await?;

        if !self.config.auto_relay {
            self.wait_processed(&mut root_events, Domain::Root, handle).await?;
            self.network.router.relay(operator, handle).await?;
        }
        self.wait_processed(&mut child_events, Domain::Child, handle).await?;
        Ok(handle)
    }

    async fn wait_processed(
        &self,
        events: &mut broadcast::Receiver<EventRecord>,
        domain: Domain,
        handle: BatchHandle,
    ) -> Result<(), SimulationError> {
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(record) => {
                        if let SettlementEvent::BatchProcessed {
                            domain: d,
                            handle: h,
                        } = record.event
                        {
                            if d == domain && h == handle {
                                return Ok(());
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(%domain, skipped, "event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SimulationError::EventsClosed(domain));
                    }
                }
            }
        };

        tokio::time::timeout(self.config.event_timeout, wait)
            .await
            .map_err(|_| SimulationError::Timeout { domain, handle })?
    }

    async fn summarize(
        &self,
        handle: BatchHandle,
        dust: Vec<Amount>,
    ) -> Result<BatchSummary, SimulationError> {
        let snapshot = self.network.batcher.snapshot().await?;
        let view = snapshot
            .batch(handle.batch_type, handle.id)
            .ok_or(SimulationError::MissingBatch(handle))?;
        Ok(BatchSummary {
            handle: handle.to_string(),
            contributors: view.contributors,
            totals: view.totals.clone(),
            result: view.result.clone(),
            dust,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::batcher::BatcherError;
    use crate::domain::batch::BatchStatus;
    use crate::interfaces::bootstrap::LaunchOptions;
    use crate::interfaces::cli::setup::Setup;

    async fn simulate(seed: u64, options: LaunchOptions) -> SimulationSummary {
        let setup = Setup::default();
        let network = Network::launch(&setup, options).await.unwrap();
        let simulation = Simulation::new(
            &network,
            SimulationConfig {
                users: 5,
                rounds: 2,
                seed,
                auto_relay: options.auto_relay,
                ..Default::default()
            },
        );
        simulation
            .fund_users(Amount::from(setup.initial_balance))
            .unwrap();
        let summary = simulation.run().await.unwrap();

        let snapshot = network.batcher.snapshot().await.unwrap();
        assert!(snapshot
            .deposit_batches
            .iter()
            .filter(|b| b.id < 2)
            .all(|b| b.status == BatchStatus::Settled));
        network.shutdown().await;
        summary
    }

    #[tokio::test]
    async fn test_rounds_settle_with_auto_relay() {
        let summary = simulate(
            7,
            LaunchOptions {
                auto_relay: true,
                ..Default::default()
            },
        )
        .await;
        assert_eq!(summary.rounds.len(), 2);
        assert_eq!(summary.rounds[1].deposit.handle, "deposit#1");
        // 每轮两批次，各一去一回
        assert_eq!(summary.frames_sent, 8);
    }

    #[tokio::test]
    async fn test_rounds_settle_with_manual_relay_and_duplicates() {
        let summary = simulate(
            11,
            LaunchOptions {
                auto_relay: false,
                duplicate_delivery: true,
                ..Default::default()
            },
        )
        .await;
        assert_eq!(summary.rounds.len(), 2);
        assert_eq!(summary.rounds[0].sell.handle, "sell#0");
    }

    #[tokio::test]
    async fn test_same_seed_same_summary() {
        let options = LaunchOptions {
            auto_relay: true,
            ..Default::default()
        };
        let a = simulate(3, options).await;
        let b = simulate(3, options).await;
        assert_eq!(
            serde_json::to_value(&a.balances).unwrap(),
            serde_json::to_value(&b.balances).unwrap()
        );
    }

    #[test]
    fn test_service_error_kind_for_ledger_failures() {
        let err = ServiceError::from(BatcherError::from(
            LedgerError::Overflow {
                account: AccountId::new("a"),
                token: "USDC".into(),
            },
        ));
        assert_eq!(err.kind(), ErrorKind::Arithmetic);
    }
}
