//! Local events emitted by both domains.
//!
//! Events are produced by the state machines and broadcast by the services;
//! they are informational and never drive state.

use crate::shared::protocol::{AccountId, Amount, BatchHandle, BatchId, Domain};
use crate::shared::timestamp::now_millis;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
    /// 用户存款进入当前开放批次
    Deposited {
        user: AccountId,
        portfolio: usize,
        amount: Amount,
        batch_id: BatchId,
    },
    /// 用户卖出请求进入当前开放批次
    SellRequested {
        user: AccountId,
        amounts: Vec<Amount>,
        batch_id: BatchId,
    },
    /// Deposit batch fired with per-portfolio aggregates
    DepositBatch { id: BatchId, amounts: Vec<Amount> },
    /// Sell batch fired with per-token aggregates
    SellTokenBatch { id: BatchId, amounts: Vec<Amount> },
    MessageSent {
        from: Domain,
        handle: BatchHandle,
        bytes: usize,
    },
    BatchProcessed { domain: Domain, handle: BatchHandle },
    /// Root invested a deposit batch
    Minted { id: BatchId, amounts: Vec<Amount> },
    /// Root divested a sell batch
    Redeemed { id: BatchId, amounts: Vec<Amount> },
    Distributed {
        id: BatchId,
        shares: BTreeMap<AccountId, Vec<Amount>>,
        dust: Vec<Amount>,
    },
    Retrieved {
        id: BatchId,
        proceeds: BTreeMap<AccountId, Amount>,
        dust: Vec<Amount>,
    },
}

impl SettlementEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SettlementEvent::Deposited { .. } => "Deposited",
            SettlementEvent::SellRequested { .. } => "SellRequested",
            SettlementEvent::DepositBatch { .. } => "DepositBatch",
            SettlementEvent::SellTokenBatch { .. } => "SellTokenBatch",
            SettlementEvent::MessageSent { .. } => "MessageSent",
            SettlementEvent::BatchProcessed { .. } => "BatchProcessed",
            SettlementEvent::Minted { .. } => "Minted",
            SettlementEvent::Redeemed { .. } => "Redeemed",
            SettlementEvent::Distributed { .. } => "Distributed",
            SettlementEvent::Retrieved { .. } => "Retrieved",
        }
    }
}

/// 带时间戳的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub event: SettlementEvent,
}

impl EventRecord {
    pub fn now(event: SettlementEvent) -> Self {
        Self {
            timestamp_ms: now_millis(),
            event,
        }
    }
}

/// 状态机内部的事件缓冲区，由服务层在每条命令之后取走
#[derive(Debug, Default)]
pub struct EventLog {
    pending: Vec<EventRecord>,
}

impl EventLog {
    pub fn push(&mut self, event: SettlementEvent) {
        self.pending.push(EventRecord::now(event));
    }

    pub fn drain(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
