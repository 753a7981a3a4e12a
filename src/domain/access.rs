//! Two-role access control.
//!
//! The administrator owns the registries (portfolios, protocols, weights,
//! wiring). The operator fires and settles batches. Neither role implies the
//! other.

use crate::shared::protocol::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("caller {caller} is not the administrator")]
    NotAdmin { caller: AccountId },

    #[error("caller {caller} is not the operator")]
    NotOperator { caller: AccountId },
}

#[derive(Debug, Clone)]
pub struct AccessControl {
    admin: AccountId,
    operator: AccountId,
}

impl AccessControl {
    pub fn new(admin: AccountId, operator: AccountId) -> Self {
        Self { admin, operator }
    }

    pub fn admin(&self) -> &AccountId {
        &self.admin
    }

    pub fn operator(&self) -> &AccountId {
        &self.operator
    }

    pub fn require_admin(&self, caller: &AccountId) -> Result<(), AccessError> {
        if caller != &self.admin {
            return Err(AccessError::NotAdmin {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    pub fn require_operator(&self, caller: &AccountId) -> Result<(), AccessError> {
        if caller != &self.operator {
            return Err(AccessError::NotOperator {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    /// Hands the operator role to another account. Admin only.
    pub fn set_operator(
        &mut self,
        caller: &AccountId,
        operator: AccountId,
    ) -> Result<(), AccessError> {
        self.require_admin(caller)?;
        self.operator = operator;
        Ok(())
    }
}
