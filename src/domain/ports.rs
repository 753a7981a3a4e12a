//! Collaborator ports.
//!
//! The state machines talk to the base-asset ledger and to the yield
//! protocols only through these traits. In-memory implementations live in
//! `infrastructure`.

use crate::shared::protocol::{AccountId, Amount, TokenId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient {token} balance for {account}: has {available}, needs {required}")]
    InsufficientBalance {
        account: AccountId,
        token: TokenId,
        available: Amount,
        required: Amount,
    },

    #[error("insufficient {token} allowance from {owner} to {spender}: has {available}, needs {required}")]
    InsufficientAllowance {
        owner: AccountId,
        spender: AccountId,
        token: TokenId,
        available: Amount,
        required: Amount,
    },

    #[error("{token} balance overflow for {account}")]
    Overflow { account: AccountId, token: TokenId },
}

/// 单条账本操作，`AssetLedger::execute` 按顺序原子执行
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOp {
    Transfer {
        token: TokenId,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    /// Spends `owner`'s allowance to `spender`
    TransferFrom {
        token: TokenId,
        spender: AccountId,
        owner: AccountId,
        to: AccountId,
        amount: Amount,
    },
    Mint {
        token: TokenId,
        to: AccountId,
        amount: Amount,
    },
    Burn {
        token: TokenId,
        from: AccountId,
        amount: Amount,
    },
}

/// Balance + allowance semantics over any number of tokens.
pub trait AssetLedger: Send + Sync {
    fn balance_of(&self, token: &TokenId, account: &AccountId) -> Amount;

    fn allowance(&self, token: &TokenId, owner: &AccountId, spender: &AccountId) -> Amount;

    fn approve(&self, token: &TokenId, owner: &AccountId, spender: &AccountId, amount: Amount);

    /// Applies every operation or none of them.
    fn execute(&self, ops: &[LedgerOp]) -> Result<(), LedgerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("protocol {protocol}: insufficient position for {beneficiary}: has {available}, needs {required}")]
    InsufficientPosition {
        protocol: String,
        beneficiary: AccountId,
        available: Amount,
        required: Amount,
    },

    #[error("protocol {protocol}: arithmetic overflow")]
    Overflow { protocol: String },
}

/// Opaque yield venue: base asset in, protocol token out, and back.
pub trait YieldProtocol: Send + Sync {
    fn name(&self) -> &str;

    /// Protocol tokens currently held for `beneficiary`.
    fn position_of(&self, beneficiary: &AccountId) -> Amount;

    /// Invests `amount` of base asset for `beneficiary`; returns protocol tokens minted.
    fn mint(&self, beneficiary: &AccountId, amount: Amount) -> Result<Amount, ProtocolError>;

    /// Redeems `amount` protocol tokens held for `beneficiary`; returns base asset released.
    fn redeem(&self, beneficiary: &AccountId, amount: Amount) -> Result<Amount, ProtocolError>;
}
