/// Root Domain Router
///
/// Receives fired batches from the child domain, turns them into protocol
/// mints (Deposit) or redeems (Sell) and keeps the result as a pending relay
/// until the operator sends it back across the tunnel.
///
/// ## Flow
/// ```text
/// inbound Deposit  ──invest_split(weights)──▶ mint per protocol ──▶ pending relay
/// inbound Sell     ──1:1──────────────────────▶ redeem per protocol ─▶ pending relay
/// relay(handle)    ──TunnelMessage──▶ child domain
/// ```

use crate::domain::access::{AccessControl, AccessError};
use crate::domain::distribution::{invest_split, DistributionError};
use crate::domain::error::ErrorKind;
use crate::domain::events::{EventLog, EventRecord, SettlementEvent};
use crate::domain::ports::{ProtocolError, YieldProtocol};
use crate::domain::registry::{Portfolio, PortfolioBook};
use crate::domain::validation::{RequestValidator, ValidationConfig, ValidationError};
use crate::infrastructure::tunnel::{Tunnel, TunnelError};
use crate::shared::metrics::METRICS;
use crate::shared::protocol::{
    AccountId, Amount, BasisPoints, BatchHandle, BatchId, BatchType, Domain, TunnelEnvelope,
    TunnelMessage, WeightMatrix,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("router is not initialized")]
    NotInitialized,

    #[error("router is already initialized")]
    AlreadyInitialized,

    #[error("tunnel is not set")]
    TunnelNotSet,

    #[error("unexpected tunnel sender {sender}")]
    UnexpectedSender { sender: AccountId },

    #[error("batch {handle} was already processed")]
    AlreadyProcessed { handle: BatchHandle },

    #[error("nothing to relay for {handle}")]
    NothingToRelay { handle: BatchHandle },
}

impl RouterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::Validation(_) => ErrorKind::Validation,
            RouterError::Access(_) | RouterError::UnexpectedSender { .. } => {
                ErrorKind::Authorization
            }
            RouterError::Distribution(DistributionError::Overflow(_)) => ErrorKind::Arithmetic,
            RouterError::Distribution(_) => ErrorKind::Validation,
            RouterError::Protocol(ProtocolError::Overflow { .. }) => ErrorKind::Arithmetic,
            RouterError::Protocol(_) | RouterError::Tunnel(_) => ErrorKind::Collaborator,
            RouterError::AlreadyProcessed { .. } => ErrorKind::Sequencing,
            RouterError::NotInitialized
            | RouterError::AlreadyInitialized
            | RouterError::TunnelNotSet
            | RouterError::NothingToRelay { .. } => ErrorKind::Precondition,
        }
    }
}

/// 根域路由器配置
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub admin: AccountId,
    pub operator: AccountId,
    pub validation: ValidationConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            admin: AccountId::new("admin"),
            operator: AccountId::new("operator"),
            validation: ValidationConfig::default(),
        }
    }
}

/// 一次性接线：子域批处理器、桥接端点、根域托管账户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterWiring {
    /// 唯一接受的入站发送方
    pub batcher: AccountId,
    /// 回传消息使用的发送方身份
    pub bridge: AccountId,
    /// 协议头寸的受益账户
    pub custody: AccountId,
}

/// 已处理但尚未回传的批次结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRelay {
    pub handle: BatchHandle,
    /// Deposit 结果附带处理时的权重矩阵，Sell 为空
    pub weight_matrix: WeightMatrix,
    pub amounts: Vec<Amount>,
}

pub struct RootRouter {
    access: AccessControl,
    validator: RequestValidator,
    portfolios: PortfolioBook,
    protocols: Vec<Arc<dyn YieldProtocol>>,
    wiring: Option<RouterWiring>,
    tunnel: Option<Arc<dyn Tunnel>>,
    pending: BTreeMap<BatchHandle, PendingRelay>,
    processed: BTreeSet<BatchHandle>,
    events: EventLog,
}

impl RootRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            access: AccessControl::new(config.admin, config.operator),
            validator: RequestValidator::with_config(config.validation),
            portfolios: PortfolioBook::new(),
            protocols: Vec::new(),
            wiring: None,
            tunnel: None,
            pending: BTreeMap::new(),
            processed: BTreeSet::new(),
            events: EventLog::default(),
        }
    }

    // ==================== 接线 ====================

    /// One-time wiring. A second call fails.
    pub fn init(&mut self, caller: &AccountId, wiring: RouterWiring) -> Result<(), RouterError> {
        self.access.require_admin(caller)?;
        if self.wiring.is_some() {
            return Err(RouterError::AlreadyInitialized);
        }
        info!(batcher = %wiring.batcher, bridge = %wiring.bridge, custody = %wiring.custody, "router wired");
        self.wiring = Some(wiring);
        Ok(())
    }

    pub fn set_tunnel(&mut self, caller: &AccountId, tunnel: Arc<dyn Tunnel>) -> Result<(), RouterError> {
        self.access.require_admin(caller)?;
        self.tunnel = Some(tunnel);
        info!("router tunnel set");
        Ok(())
    }

    pub fn set_operator(&mut self, caller: &AccountId, operator: AccountId) -> Result<(), RouterError> {
        self.access.set_operator(caller, operator.clone())?;
        info!(%operator, "root operator changed");
        Ok(())
    }

    // ==================== 登记 ====================

    pub fn add_portfolio(&mut self, caller: &AccountId, name: &str) -> Result<usize, RouterError> {
        self.access.require_admin(caller)?;
        self.validator.validate_name(name)?;
        let index = self.portfolios.add_portfolio(name);
        info!(index, name, "root portfolio registered");
        Ok(index)
    }

    /// Registers a protocol. Every existing portfolio gets a zero weight for it.
    pub fn add_protocol(
        &mut self,
        caller: &AccountId,
        protocol: Arc<dyn YieldProtocol>,
    ) -> Result<usize, RouterError> {
        self.access.require_admin(caller)?;
        self.validator.validate_name(protocol.name())?;
        let index = self.portfolios.add_protocol_column();
        info!(index, name = protocol.name(), "protocol registered");
        self.protocols.push(protocol);
        Ok(index)
    }

    pub fn set_portfolio_weights(
        &mut self,
        caller: &AccountId,
        portfolio: usize,
        weights: Vec<BasisPoints>,
    ) -> Result<(), RouterError> {
        self.access.require_admin(caller)?;
        self.validator.validate_weights(
            portfolio,
            &weights,
            self.portfolios.portfolio_count(),
            self.protocols.len(),
        )?;
        info!(portfolio, ?weights, "portfolio weights set");
        self.portfolios.set_weights(portfolio, weights);
        Ok(())
    }

    // ==================== 入站消息 ====================

    /// Invests or divests a fired batch and stores the result for relay.
    pub fn on_inbound_message(&mut self, envelope: TunnelEnvelope) -> Result<BatchHandle, RouterError> {
        let wiring = self.wiring.as_ref().ok_or(RouterError::NotInitialized)?;
        if envelope.sender != wiring.batcher {
            return Err(RouterError::UnexpectedSender {
                sender: envelope.sender,
            });
        }

        let message = envelope.message;
        let handle = message.handle();
        if self.processed.contains(&handle) {
            return Err(RouterError::AlreadyProcessed { handle });
        }

        let custody = wiring.custody.clone();
        let relay = match handle.batch_type {
            BatchType::Deposit => self.invest(handle, &custody, &message.amounts)?,
            BatchType::Sell => self.divest(handle, &custody, &message.amounts)?,
        };

        METRICS
            .batches_processed_total
            .with_label_values(&[Domain::Root.as_str(), handle.batch_type.as_str()])
            .inc();

        self.events.push(match handle.batch_type {
            BatchType::Deposit => SettlementEvent::Minted {
                id: handle.id,
                amounts: relay.amounts.clone(),
            },
            BatchType::Sell => SettlementEvent::Redeemed {
                id: handle.id,
                amounts: relay.amounts.clone(),
            },
        });
        self.events.push(SettlementEvent::BatchProcessed {
            domain: Domain::Root,
            handle,
        });

        self.processed.insert(handle);
        self.pending.insert(handle, relay);
        Ok(handle)
    }

    fn invest(
        &self,
        handle: BatchHandle,
        custody: &AccountId,
        aggregates: &[Amount],
    ) -> Result<PendingRelay, RouterError> {
        self.validator.validate_amounts_len(
            "deposit",
            self.portfolios.portfolio_count(),
            aggregates.len(),
        )?;

        let weight_matrix = self.portfolios.weight_matrix();
        let split = invest_split(aggregates, &weight_matrix, self.protocols.len())?;

        let mut minted = Vec::with_capacity(split.len());
        for (index, (protocol, &amount)) in self.protocols.iter().zip(&split).enumerate() {
            if amount == 0 {
                minted.push(0);
                continue;
            }
            match protocol.mint(custody, amount) {
                Ok(tokens) => minted.push(tokens),
                Err(e) => {
                    self.unwind_mints(custody, &minted[..index]);
                    return Err(e.into());
                }
            }
        }

        info!(%handle, ?aggregates, ?split, ?minted, "deposit batch invested");
        Ok(PendingRelay {
            handle,
            weight_matrix,
            amounts: minted,
        })
    }

    fn divest(
        &self,
        handle: BatchHandle,
        custody: &AccountId,
        amounts: &[Amount],
    ) -> Result<PendingRelay, RouterError> {
        self.validator
            .validate_amounts_len("sell", self.protocols.len(), amounts.len())?;

        for (protocol, &amount) in self.protocols.iter().zip(amounts) {
            let available = protocol.position_of(custody);
            if available < amount {
                return Err(ProtocolError::InsufficientPosition {
                    protocol: protocol.name().to_string(),
                    beneficiary: custody.clone(),
                    available,
                    required: amount,
                }
                .into());
            }
        }

        let mut redeemed = Vec::with_capacity(amounts.len());
        for (index, (protocol, &amount)) in self.protocols.iter().zip(amounts).enumerate() {
            if amount == 0 {
                redeemed.push(0);
                continue;
            }
            match protocol.redeem(custody, amount) {
                Ok(released) => redeemed.push(released),
                Err(e) => {
                    self.unwind_redeems(custody, &redeemed[..index]);
                    return Err(e.into());
                }
            }
        }

        info!(%handle, ?amounts, ?redeemed, "sell batch divested");
        Ok(PendingRelay {
            handle,
            weight_matrix: Vec::new(),
            amounts: redeemed,
        })
    }

    /// Redeems the tokens minted before a failing protocol.
    fn unwind_mints(&self, custody: &AccountId, minted: &[Amount]) {
        for (protocol, &tokens) in self.protocols.iter().zip(minted) {
            if tokens == 0 {
                continue;
            }
            if let Err(e) = protocol.redeem(custody, tokens) {
                error!(protocol = protocol.name(), error = %e, "failed to unwind mint");
            }
        }
    }

    /// Reinvests the base asset released before a failing protocol.
    fn unwind_redeems(&self, custody: &AccountId, released: &[Amount]) {
        for (protocol, &amount) in self.protocols.iter().zip(released) {
            if amount == 0 {
                continue;
            }
            if let Err(e) = protocol.mint(custody, amount) {
                error!(protocol = protocol.name(), error = %e, "failed to unwind redeem");
            }
        }
    }

    // ==================== 回传 ====================

    /// Sends a processed result back to the child domain.
    ///
    /// The pending record is only dropped after the send succeeded, so a failed
    /// relay can be triggered again.
    pub fn relay(&mut self, caller: &AccountId, handle: BatchHandle) -> Result<usize, RouterError> {
        self.access.require_operator(caller)?;
        let wiring = self.wiring.as_ref().ok_or(RouterError::NotInitialized)?;
        let tunnel = self.tunnel.as_ref().ok_or(RouterError::TunnelNotSet)?;
        let record = self
            .pending
            .get(&handle)
            .ok_or(RouterError::NothingToRelay { handle })?;

        let envelope = TunnelEnvelope {
            sender: wiring.bridge.clone(),
            message: TunnelMessage {
                batch_type: handle.batch_type,
                id: handle.id,
                weight_matrix: record.weight_matrix.clone(),
                amounts: record.amounts.clone(),
            },
        };

        let bytes = tunnel.send(Domain::Child, &envelope).map_err(|e| {
            warn!(%handle, error = %e, "relay failed, result kept for retry");
            e
        })?;

        self.pending.remove(&handle);
        info!(%handle, bytes, "result relayed to child domain");
        self.events.push(SettlementEvent::MessageSent {
            from: Domain::Root,
            handle,
            bytes,
        });
        Ok(bytes)
    }

    /// Relays the result of deposit batch `id`.
    pub fn relay_deposit(&mut self, caller: &AccountId, id: BatchId) -> Result<usize, RouterError> {
        self.relay(caller, BatchHandle::deposit(id))
    }

    /// Relays the result of sell batch `id`.
    pub fn relay_sell(&mut self, caller: &AccountId, id: BatchId) -> Result<usize, RouterError> {
        self.relay(caller, BatchHandle::sell(id))
    }

    // ==================== 查询 ====================

    pub fn portfolios(&self) -> &[Portfolio] {
        self.portfolios.portfolios()
    }

    pub fn weight_matrix(&self) -> WeightMatrix {
        self.portfolios.weight_matrix()
    }

    pub fn protocol_names(&self) -> Vec<String> {
        self.protocols.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn pending(&self, handle: &BatchHandle) -> Option<&PendingRelay> {
        self.pending.get(handle)
    }

    pub fn pending_relays(&self) -> impl Iterator<Item = &PendingRelay> {
        self.pending.values()
    }

    pub fn is_processed(&self, handle: &BatchHandle) -> bool {
        self.processed.contains(handle)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn operator(&self) -> &AccountId {
        self.access.operator()
    }

    pub fn drain_events(&mut self) -> Vec<EventRecord> {
        self.events.drain()
    }
}
