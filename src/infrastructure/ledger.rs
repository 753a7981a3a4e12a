/// In-memory asset ledger
///
/// Multi-token balances and allowances behind one `parking_lot::Mutex`.
/// `execute` works on a copy of the state and swaps it in only when every
/// operation succeeded.

use crate::domain::ports::{AssetLedger, LedgerError, LedgerOp};
use crate::shared::protocol::{AccountId, Amount, TokenId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    balances: HashMap<(TokenId, AccountId), Amount>,
    allowances: HashMap<(TokenId, AccountId, AccountId), Amount>,
    supply: HashMap<TokenId, Amount>,
}

impl LedgerState {
    fn balance(&self, token: &TokenId, account: &AccountId) -> Amount {
        self.balances
            .get(&(token.clone(), account.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn debit(&mut self, token: &TokenId, account: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let available = self.balance(token, account);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: account.clone(),
                token: token.clone(),
                available,
                required: amount,
            });
        }
        self.balances
            .insert((token.clone(), account.clone()), available - amount);
        Ok(())
    }

    fn credit(&mut self, token: &TokenId, account: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let updated = self
            .balance(token, account)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow {
                account: account.clone(),
                token: token.clone(),
            })?;
        self.balances.insert((token.clone(), account.clone()), updated);
        Ok(())
    }

    fn apply(&mut self, op: &LedgerOp) -> Result<(), LedgerError> {
        match op {
            LedgerOp::Transfer { token, from, to, amount } => {
                self.debit(token, from, *amount)?;
                self.credit(token, to, *amount)
            }
            LedgerOp::TransferFrom {
                token,
                spender,
                owner,
                to,
                amount,
            } => {
                let key = (token.clone(), owner.clone(), spender.clone());
                let available = self.allowances.get(&key).copied().unwrap_or(0);
                if available < *amount {
                    return Err(LedgerError::InsufficientAllowance {
                        owner: owner.clone(),
                        spender: spender.clone(),
                        token: token.clone(),
                        available,
                        required: *amount,
                    });
                }
                self.debit(token, owner, *amount)?;
                self.credit(token, to, *amount)?;
                self.allowances.insert(key, available - amount);
                Ok(())
            }
            LedgerOp::Mint { token, to, amount } => {
                self.credit(token, to, *amount)?;
                let supply = self.supply.entry(token.clone()).or_insert(0);
                *supply = supply.saturating_add(*amount);
                Ok(())
            }
            LedgerOp::Burn { token, from, amount } => {
                self.debit(token, from, *amount)?;
                let supply = self.supply.entry(token.clone()).or_insert(0);
                *supply = supply.saturating_sub(*amount);
                Ok(())
            }
        }
    }
}

/// 内存账本，克隆后共享同一份状态
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接铸造（初始化资金、测试用）
    pub fn mint(&self, token: &TokenId, to: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        self.execute(&[LedgerOp::Mint {
            token: token.clone(),
            to: to.clone(),
            amount,
        }])
    }

    pub fn total_supply(&self, token: &TokenId) -> Amount {
        self.state.lock().supply.get(token).copied().unwrap_or(0)
    }
}

impl AssetLedger for InMemoryLedger {
    fn balance_of(&self, token: &TokenId, account: &AccountId) -> Amount {
        self.state.lock().balance(token, account)
    }

    fn allowance(&self, token: &TokenId, owner: &AccountId, spender: &AccountId) -> Amount {
        self.state
            .lock()
            .allowances
            .get(&(token.clone(), owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn approve(&self, token: &TokenId, owner: &AccountId, spender: &AccountId, amount: Amount) {
        self.state
            .lock()
            .allowances
            .insert((token.clone(), owner.clone(), spender.clone()), amount);
    }

    fn execute(&self, ops: &[LedgerOp]) -> Result<(), LedgerError> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        let mut working = state.clone();
        for op in ops {
            working.apply(op)?;
        }
        *state = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> TokenId {
        TokenId::new("USDC")
    }

    #[test]
    fn test_transfer_from_spends_allowance() {
        let ledger = InMemoryLedger::new();
        let alice = AccountId::new("alice");
        let custody = AccountId::new("custody");
        ledger.mint(&usdc(), &alice, 500).unwrap();
        ledger.approve(&usdc(), &alice, &custody, 300);

        ledger
            .execute(&[LedgerOp::TransferFrom {
                token: usdc(),
                spender: custody.clone(),
                owner: alice.clone(),
                to: custody.clone(),
                amount: 200,
            }])
            .unwrap();

        assert_eq!(ledger.balance_of(&usdc(), &alice), 300);
        assert_eq!(ledger.balance_of(&usdc(), &custody), 200);
        assert_eq!(ledger.allowance(&usdc(), &alice, &custody), 100);
    }

    #[test]
    fn test_insufficient_allowance() {
        let ledger = InMemoryLedger::new();
        let alice = AccountId::new("alice");
        let custody = AccountId::new("custody");
        ledger.mint(&usdc(), &alice, 500).unwrap();

        let err = ledger
            .execute(&[LedgerOp::TransferFrom {
                token: usdc(),
                spender: custody.clone(),
                owner: alice.clone(),
                to: custody,
                amount: 1,
            }])
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientAllowance { available: 0, .. }));
    }

    #[test]
    fn test_execute_is_all_or_nothing() {
        let ledger = InMemoryLedger::new();
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");
        ledger.mint(&usdc(), &alice, 100).unwrap();

        let result = ledger.execute(&[
            LedgerOp::Transfer {
                token: usdc(),
                from: alice.clone(),
                to: bob.clone(),
                amount: 60,
            },
            LedgerOp::Transfer {
                token: usdc(),
                from: alice.clone(),
                to: bob.clone(),
                amount: 60,
            },
        ]);

        assert!(matches!(result, Err(LedgerError::InsufficientBalance { available: 40, .. })));
        assert_eq!(ledger.balance_of(&usdc(), &alice), 100);
        assert_eq!(ledger.balance_of(&usdc(), &bob), 0);
    }

    #[test]
    fn test_burn_reduces_supply() {
        let ledger = InMemoryLedger::new();
        let custody = AccountId::new("custody");
        ledger.mint(&usdc(), &custody, 190).unwrap();
        ledger
            .execute(&[LedgerOp::Burn {
                token: usdc(),
                from: custody.clone(),
                amount: 190,
            }])
            .unwrap();

        assert_eq!(ledger.balance_of(&usdc(), &custody), 0);
        assert_eq!(ledger.total_supply(&usdc()), 0);
    }
}
