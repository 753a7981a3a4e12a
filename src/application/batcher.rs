/// Child Domain Batcher
///
/// Accepts user deposits and sell requests, accumulates them into the open
/// batch of each type, fires batches across the tunnel to the root domain and,
/// once the root response arrives, settles every contributor's share.
///
/// ## Custody flow
/// - `deposit`: base asset user → custody
/// - `execute_deposit_batch`: base asset burned from custody (bridged out)
/// - inbound Deposit response: protocol tokens minted into custody (bridged in)
/// - `distribute`: protocol tokens custody → users
///
/// The sell flow mirrors it with protocol tokens going out and base asset
/// coming back for `retrieve`.
///
/// Every operation either applies fully or returns an error with no state
/// change.

use crate::domain::access::{AccessControl, AccessError};
use crate::domain::batch::{Batch, BatchBook, BatchStatus};
use crate::domain::distribution::{
    allocate_minted, allocate_proceeds, sell_amount, Allocation, DistributionError,
};
use crate::domain::error::ErrorKind;
use crate::domain::events::{EventLog, EventRecord, SettlementEvent};
use crate::domain::ports::{AssetLedger, LedgerError, LedgerOp};
use crate::domain::registry::{ProtocolToken, TokenRegistry};
use crate::domain::validation::{RequestValidator, ValidationConfig, ValidationError};
use crate::infrastructure::tunnel::{Tunnel, TunnelError};
use crate::shared::metrics::METRICS;
use crate::shared::protocol::{
    AccountId, Amount, BasisPoints, BatchHandle, BatchId, BatchType, Domain, TokenId,
    TunnelEnvelope, TunnelMessage,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum BatcherError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("Batch not fired: {handle}")]
    BatchNotFired { handle: BatchHandle },

    #[error("Can not distribute before batch is processed in L1 (deposit batch {id})")]
    DistributeNotProcessed { id: BatchId },

    #[error("Can not retrieve usdc before batch is processed in L1 (sell batch {id})")]
    RetrieveNotProcessed { id: BatchId },

    #[error("unexpected tunnel sender {sender}")]
    UnexpectedSender { sender: AccountId },

    #[error("retrieved amount exceeds recorded deposit of {user}: deposited {deposited}, retrieved {retrieved}")]
    RetrieveExceedsDeposit {
        user: AccountId,
        deposited: Amount,
        retrieved: Amount,
    },
}

impl BatcherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BatcherError::Validation(_) => ErrorKind::Validation,
            BatcherError::Access(_) | BatcherError::UnexpectedSender { .. } => {
                ErrorKind::Authorization
            }
            BatcherError::Distribution(DistributionError::Overflow(_)) => ErrorKind::Arithmetic,
            BatcherError::Distribution(_) => ErrorKind::Validation,
            BatcherError::Ledger(LedgerError::Overflow { .. })
            | BatcherError::RetrieveExceedsDeposit { .. } => ErrorKind::Arithmetic,
            BatcherError::Ledger(_) | BatcherError::Tunnel(_) => ErrorKind::Collaborator,
            BatcherError::BatchNotFired { .. } => ErrorKind::Sequencing,
            BatcherError::DistributeNotProcessed { .. }
            | BatcherError::RetrieveNotProcessed { .. } => ErrorKind::Precondition,
        }
    }
}

/// 子域批处理器配置
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// 管理员：维护组合与协议代币登记
    pub admin: AccountId,
    /// 运营者：触发批次、分发与赎回
    pub operator: AccountId,
    /// 托管账户，持有批次资金
    pub custody: AccountId,
    /// 本域在隧道上的发送方身份
    pub endpoint: AccountId,
    /// 唯一接受的入站发送方（根域桥接端点）
    pub root_endpoint: AccountId,
    /// 基础资产
    pub base_asset: TokenId,
    pub validation: ValidationConfig,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            admin: AccountId::new("admin"),
            operator: AccountId::new("operator"),
            custody: AccountId::new("child-custody"),
            endpoint: AccountId::new("child-batcher"),
            root_endpoint: AccountId::new("root-bridge"),
            base_asset: TokenId::new("USDC"),
            validation: ValidationConfig::default(),
        }
    }
}

pub struct ChildBatcher<L: AssetLedger> {
    config: BatcherConfig,
    access: AccessControl,
    validator: RequestValidator,
    registry: TokenRegistry,
    deposits: BatchBook,
    sells: BatchBook,
    deposit_per_user: BTreeMap<AccountId, Amount>,
    ledger: L,
    tunnel: Arc<dyn Tunnel>,
    events: EventLog,
}

impl<L: AssetLedger> ChildBatcher<L> {
    pub fn new(config: BatcherConfig, ledger: L, tunnel: Arc<dyn Tunnel>) -> Self {
        let access = AccessControl::new(config.admin.clone(), config.operator.clone());
        let validator = RequestValidator::with_config(config.validation.clone());
        Self {
            config,
            access,
            validator,
            registry: TokenRegistry::new(),
            deposits: BatchBook::new(BatchType::Deposit),
            sells: BatchBook::new(BatchType::Sell),
            deposit_per_user: BTreeMap::new(),
            ledger,
            tunnel,
            events: EventLog::default(),
        }
    }

    // ==================== 管理操作 ====================

    pub fn add_portfolio(&mut self, caller: &AccountId, name: &str) -> Result<usize, BatcherError> {
        self.access.require_admin(caller)?;
        self.validator.validate_name(name)?;
        let index = self.registry.add_portfolio(name);
        info!(index, name, "child portfolio registered");
        Ok(index)
    }

    pub fn add_protocol_token(
        &mut self,
        caller: &AccountId,
        name: &str,
        token: TokenId,
    ) -> Result<usize, BatcherError> {
        self.access.require_admin(caller)?;
        self.validator.validate_name(name)?;
        let index = self.registry.add_token(name, token.clone());
        info!(index, name, %token, "protocol token registered");
        Ok(index)
    }

    pub fn set_operator(&mut self, caller: &AccountId, operator: AccountId) -> Result<(), BatcherError> {
        self.access.set_operator(caller, operator.clone())?;
        info!(%operator, "child operator changed");
        Ok(())
    }

    // ==================== 用户操作 ====================

    /// Moves `amount` of base asset from `caller` into custody and records it
    /// against the open deposit batch for `portfolio`.
    pub fn deposit(
        &mut self,
        caller: &AccountId,
        amount: Amount,
        portfolio: usize,
    ) -> Result<BatchId, BatcherError> {
        let width = self.registry.portfolio_count();
        self.validator.validate_deposit(amount, portfolio, width)?;

        let per_user = self
            .deposit_per_user
            .get(caller)
            .copied()
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or(DistributionError::Overflow("deposit per user"))?;

        let staged = self.deposits.stage(caller, &[(portfolio, amount)], width)?;

        self.ledger.execute(&[LedgerOp::TransferFrom {
            token: self.config.base_asset.clone(),
            spender: self.config.custody.clone(),
            owner: caller.clone(),
            to: self.config.custody.clone(),
            amount,
        }])?;

        let batch_id = self.deposits.commit(staged);
        self.deposit_per_user.insert(caller.clone(), per_user);

        let portfolio_name = self.registry.portfolios()[portfolio].as_str();
        METRICS
            .deposits_total
            .with_label_values(&[portfolio_name])
            .inc();
        self.update_open_gauge(BatchType::Deposit);

        debug!(user = %caller, amount, portfolio, batch_id, "deposit recorded");
        self.events.push(SettlementEvent::Deposited {
            user: caller.clone(),
            portfolio,
            amount,
            batch_id,
        });
        Ok(batch_id)
    }

    /// Sells a basis-point fraction of the caller's balance of every protocol
    /// token into the open sell batch.
    pub fn sell(
        &mut self,
        caller: &AccountId,
        percentages: &[BasisPoints],
    ) -> Result<BatchId, BatcherError> {
        let width = self.registry.token_count();
        self.validator.validate_sell_percentages(percentages, width)?;

        let mut recorded = Vec::new();
        let mut moves = Vec::new();
        for (index, (token, &pct)) in self.registry.tokens().iter().zip(percentages).enumerate() {
            let balance = self.ledger.balance_of(&token.token, caller);
            let amount = sell_amount(balance, pct)?;
            if amount == 0 {
                continue;
            }
            recorded.push((index, amount));
            moves.push(LedgerOp::TransferFrom {
                token: token.token.clone(),
                spender: self.config.custody.clone(),
                owner: caller.clone(),
                to: self.config.custody.clone(),
                amount,
            });
        }

        if recorded.is_empty() {
            return Err(ValidationError::EmptySell.into());
        }

        let staged = self.sells.stage(caller, &recorded, width)?;
        self.ledger.execute(&moves)?;
        let batch_id = self.sells.commit(staged);

        let mut amounts = vec![0; width];
        for &(index, amount) in &recorded {
            amounts[index] = amount;
        }

        METRICS
            .sell_requests_total
            .with_label_values(&[Domain::Child.as_str()])
            .inc();
        self.update_open_gauge(BatchType::Sell);

        debug!(user = %caller, ?amounts, batch_id, "sell recorded");
        self.events.push(SettlementEvent::SellRequested {
            user: caller.clone(),
            amounts,
            batch_id,
        });
        Ok(batch_id)
    }

    // ==================== 批次触发 ====================

    pub fn execute_deposit_batch(&mut self, caller: &AccountId) -> Result<BatchHandle, BatcherError> {
        self.fire(caller, BatchType::Deposit)
    }

    pub fn execute_sell_batch(&mut self, caller: &AccountId) -> Result<BatchHandle, BatcherError> {
        self.fire(caller, BatchType::Sell)
    }

    /// Closes the open batch of `batch_type`, bridges its custody out and
    /// sends the aggregate amounts to the root domain.
    ///
    /// The batch only moves to `Fired` after the send succeeded; a failed
    /// send restores custody and leaves the batch open.
    pub fn fire(&mut self, caller: &AccountId, batch_type: BatchType) -> Result<BatchHandle, BatcherError> {
        self.access.require_operator(caller)?;

        let width = self.width(batch_type);
        let book = self.book(batch_type);
        let handle = BatchHandle::new(batch_type, book.current_id());
        let amounts = book.open_batch().totals_padded(width);

        let outgoing = self.custody_assets(batch_type, &amounts)?;
        let burns: Vec<LedgerOp> = outgoing
            .iter()
            .map(|(token, amount)| LedgerOp::Burn {
                token: token.clone(),
                from: self.config.custody.clone(),
                amount: *amount,
            })
            .collect();
        self.ledger.execute(&burns)?;

        let envelope = TunnelEnvelope {
            sender: self.config.endpoint.clone(),
            message: TunnelMessage::fired(handle, amounts.clone()),
        };
        let bytes = match self.tunnel.send(Domain::Root, &envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%handle, error = %e, "fire aborted, tunnel send failed");
                self.restore_custody(&outgoing);
                return Err(e.into());
            }
        };

        let response_width = self.registry.token_count();
        let fired = self.book_mut(batch_type).fire(width, response_width);
        debug_assert_eq!(fired, handle);

        METRICS
            .batches_fired_total
            .with_label_values(&[batch_type.as_str()])
            .inc();
        self.update_open_gauge(batch_type);

        info!(%handle, ?amounts, bytes, "batch fired");
        self.events.push(match batch_type {
            BatchType::Deposit => SettlementEvent::DepositBatch {
                id: handle.id,
                amounts,
            },
            BatchType::Sell => SettlementEvent::SellTokenBatch {
                id: handle.id,
                amounts,
            },
        });
        self.events.push(SettlementEvent::MessageSent {
            from: Domain::Child,
            handle,
            bytes,
        });
        Ok(handle)
    }

    // ==================== 入站消息 ====================

    /// Applies the root domain's response to a fired batch.
    ///
    /// Only a batch in `Fired` status accepts a response, so a duplicate or
    /// premature delivery fails with "Batch not fired" and changes nothing.
    pub fn on_inbound_message(&mut self, envelope: TunnelEnvelope) -> Result<BatchHandle, BatcherError> {
        if envelope.sender != self.config.root_endpoint {
            return Err(BatcherError::UnexpectedSender {
                sender: envelope.sender,
            });
        }

        let message = envelope.message;
        let handle = message.handle();
        let batch = self
            .book(handle.batch_type)
            .get(handle.id)
            .filter(|b| b.status == BatchStatus::Fired)
            .ok_or(BatcherError::BatchNotFired { handle })?;

        let incoming = match handle.batch_type {
            BatchType::Deposit => {
                self.validator.validate_amounts_len(
                    "minted",
                    batch.response_width(),
                    message.amounts.len(),
                )?;
                self.validator.validate_amounts_len(
                    "weight matrix row",
                    batch.totals().len(),
                    message.weight_matrix.len(),
                )?;
                for row in &message.weight_matrix {
                    self.validator.validate_amounts_len(
                        "weight",
                        message.amounts.len(),
                        row.len(),
                    )?;
                }
                self.registry
                    .tokens()
                    .iter()
                    .zip(&message.amounts)
                    .filter(|(_, amount)| **amount > 0)
                    .map(|(token, amount)| (token.token.clone(), *amount))
                    .collect::<Vec<_>>()
            }
            BatchType::Sell => {
                self.validator.validate_amounts_len(
                    "redeemed",
                    batch.response_width(),
                    message.amounts.len(),
                )?;
                let total = checked_sum(&message.amounts, "redeemed total")?;
                if total > 0 {
                    vec![(self.config.base_asset.clone(), total)]
                } else {
                    Vec::new()
                }
            }
        };

        let mints: Vec<LedgerOp> = incoming
            .into_iter()
            .map(|(token, amount)| LedgerOp::Mint {
                token,
                to: self.config.custody.clone(),
                amount,
            })
            .collect();
        self.ledger.execute(&mints)?;

        if let Some(batch) = self.book_mut(handle.batch_type).get_mut(handle.id) {
            batch.mark_processed(message.weight_matrix, message.amounts);
        }

        METRICS
            .batches_processed_total
            .with_label_values(&[Domain::Child.as_str(), handle.batch_type.as_str()])
            .inc();

        info!(%handle, "batch processed from root response");
        self.events.push(SettlementEvent::BatchProcessed {
            domain: Domain::Child,
            handle,
        });
        Ok(handle)
    }

    // ==================== 结算 ====================

    /// Pays every contributor of a processed deposit batch their share of the
    /// minted protocol tokens. Floor dust stays in custody.
    pub fn distribute(
        &mut self,
        caller: &AccountId,
        id: BatchId,
    ) -> Result<Allocation<Vec<Amount>>, BatcherError> {
        self.access.require_operator(caller)?;

        let batch = self
            .deposits
            .get(id)
            .filter(|b| b.status == BatchStatus::Processed)
            .ok_or(BatcherError::DistributeNotProcessed { id })?;

        let allocation = allocate_minted(batch.result(), batch.weight_matrix(), batch.contributions())?;

        let mut payouts = Vec::new();
        for (user, shares) in &allocation.shares {
            for (token, &share) in self.registry.tokens().iter().zip(shares) {
                if share > 0 {
                    payouts.push(LedgerOp::Transfer {
                        token: token.token.clone(),
                        from: self.config.custody.clone(),
                        to: user.clone(),
                        amount: share,
                    });
                }
            }
        }
        self.ledger.execute(&payouts)?;

        if let Some(batch) = self.deposits.get_mut(id) {
            batch.mark_settled();
        }
        self.record_settlement(BatchType::Deposit, &allocation.dust);

        info!(
            batch_id = id,
            users = allocation.shares.len(),
            dust = allocation.total_dust() as u64,
            "deposit batch distributed"
        );
        self.events.push(SettlementEvent::Distributed {
            id,
            shares: allocation.shares.clone(),
            dust: allocation.dust.clone(),
        });
        Ok(allocation)
    }

    /// Pays every seller of a processed sell batch their share of the redeemed
    /// base asset and reduces their recorded principal by the amount paid.
    ///
    /// Fails without paying anyone when a seller's payout exceeds their
    /// recorded principal.
    pub fn retrieve(
        &mut self,
        caller: &AccountId,
        id: BatchId,
    ) -> Result<Allocation<Amount>, BatcherError> {
        self.access.require_operator(caller)?;

        let batch = self
            .sells
            .get(id)
            .filter(|b| b.status == BatchStatus::Processed)
            .ok_or(BatcherError::RetrieveNotProcessed { id })?;

        let allocation = allocate_proceeds(batch.result(), batch.contributions())?;

        // 本金必须足以按实付金额扣减，否则整笔赎回拒绝
        let mut principals = Vec::with_capacity(allocation.shares.len());
        for (user, &proceeds) in &allocation.shares {
            if proceeds == 0 {
                continue;
            }
            let deposited = self.deposit_per_user(user);
            let remaining = deposited.checked_sub(proceeds).ok_or_else(|| {
                BatcherError::RetrieveExceedsDeposit {
                    user: user.clone(),
                    deposited,
                    retrieved: proceeds,
                }
            })?;
            principals.push((user.clone(), remaining));
        }

        let payouts: Vec<LedgerOp> = allocation
            .shares
            .iter()
            .filter(|(_, proceeds)| **proceeds > 0)
            .map(|(user, &proceeds)| LedgerOp::Transfer {
                token: self.config.base_asset.clone(),
                from: self.config.custody.clone(),
                to: user.clone(),
                amount: proceeds,
            })
            .collect();
        self.ledger.execute(&payouts)?;

        self.deposit_per_user.extend(principals);

        if let Some(batch) = self.sells.get_mut(id) {
            batch.mark_settled();
        }
        self.record_settlement(BatchType::Sell, &allocation.dust);

        info!(
            batch_id = id,
            users = allocation.shares.len(),
            dust = allocation.total_dust() as u64,
            "sell batch retrieved"
        );
        self.events.push(SettlementEvent::Retrieved {
            id,
            proceeds: allocation.shares.clone(),
            dust: allocation.dust.clone(),
        });
        Ok(allocation)
    }

    // ==================== 查询 ====================

    pub fn deposit_batch_id(&self) -> BatchId {
        self.deposits.current_id()
    }

    pub fn sell_batch_id(&self) -> BatchId {
        self.sells.current_id()
    }

    pub fn deposit_batch(&self, id: BatchId) -> Option<&Batch> {
        self.deposits.get(id)
    }

    pub fn sell_batch(&self, id: BatchId) -> Option<&Batch> {
        self.sells.get(id)
    }

    pub fn batches(&self, batch_type: BatchType) -> &BatchBook {
        self.book(batch_type)
    }

    pub fn deposit_per_user(&self, user: &AccountId) -> Amount {
        self.deposit_per_user.get(user).copied().unwrap_or(0)
    }

    pub fn deposits_per_user(&self) -> &BTreeMap<AccountId, Amount> {
        &self.deposit_per_user
    }

    pub fn portfolios(&self) -> &[String] {
        self.registry.portfolios()
    }

    pub fn tokens(&self) -> &[ProtocolToken] {
        self.registry.tokens()
    }

    pub fn operator(&self) -> &AccountId {
        self.access.operator()
    }

    pub fn custody(&self) -> &AccountId {
        &self.config.custody
    }

    pub fn base_asset(&self) -> &TokenId {
        &self.config.base_asset
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Takes the events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<EventRecord> {
        self.events.drain()
    }

    // ==================== 内部辅助 ====================

    fn book(&self, batch_type: BatchType) -> &BatchBook {
        match batch_type {
            BatchType::Deposit => &self.deposits,
            BatchType::Sell => &self.sells,
        }
    }

    fn book_mut(&mut self, batch_type: BatchType) -> &mut BatchBook {
        match batch_type {
            BatchType::Deposit => &mut self.deposits,
            BatchType::Sell => &mut self.sells,
        }
    }

    fn width(&self, batch_type: BatchType) -> usize {
        match batch_type {
            BatchType::Deposit => self.registry.portfolio_count(),
            BatchType::Sell => self.registry.token_count(),
        }
    }

    /// Custody assets leaving with a fired batch: the summed base asset for a
    /// deposit batch, each sold protocol token for a sell batch.
    fn custody_assets(
        &self,
        batch_type: BatchType,
        amounts: &[Amount],
    ) -> Result<Vec<(TokenId, Amount)>, BatcherError> {
        let assets = match batch_type {
            BatchType::Deposit => {
                let total = checked_sum(amounts, "deposit batch total")?;
                vec![(self.config.base_asset.clone(), total)]
            }
            BatchType::Sell => self
                .registry
                .tokens()
                .iter()
                .zip(amounts)
                .map(|(token, &amount)| (token.token.clone(), amount))
                .collect(),
        };
        Ok(assets.into_iter().filter(|(_, amount)| *amount > 0).collect())
    }

    fn restore_custody(&self, assets: &[(TokenId, Amount)]) {
        let mints: Vec<LedgerOp> = assets
            .iter()
            .map(|(token, amount)| LedgerOp::Mint {
                token: token.clone(),
                to: self.config.custody.clone(),
                amount: *amount,
            })
            .collect();
        if let Err(e) = self.ledger.execute(&mints) {
            error!(error = %e, "failed to restore custody after aborted fire");
        }
    }

    fn update_open_gauge(&self, batch_type: BatchType) {
        let total: Amount = self
            .book(batch_type)
            .open_batch()
            .totals()
            .iter()
            .fold(0, |acc: Amount, a| acc.saturating_add(*a));
        METRICS
            .open_batch_amount
            .with_label_values(&[batch_type.as_str()])
            .set(total as f64);
    }

    fn record_settlement(&self, batch_type: BatchType, dust: &[Amount]) {
        METRICS
            .batches_settled_total
            .with_label_values(&[batch_type.as_str()])
            .inc();
        let dust: Amount = dust.iter().fold(0, |acc: Amount, d| acc.saturating_add(*d));
        METRICS
            .undistributed_dust_total
            .with_label_values(&[batch_type.as_str()])
            .inc_by(dust as f64);
    }
}

fn checked_sum(amounts: &[Amount], context: &'static str) -> Result<Amount, DistributionError> {
    amounts.iter().try_fold(0 as Amount, |acc, a| {
        acc.checked_add(*a).ok_or(DistributionError::Overflow(context))
    })
}
