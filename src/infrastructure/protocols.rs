/// In-memory yield protocol
///
/// Mints protocol tokens at `rate_bps` tokens per 10 000 units of base asset
/// and redeems at the same rate. Lowering the rate after a mint makes each
/// token redeem for more base asset, which is how yield shows up.

use crate::domain::ports::{ProtocolError, YieldProtocol};
use crate::shared::protocol::{AccountId, Amount, BasisPoints, BPS_DENOMINATOR};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct InMemoryProtocol {
    name: String,
    rate_bps: AtomicU32,
    positions: Mutex<HashMap<AccountId, Amount>>,
}

impl InMemoryProtocol {
    /// A zero rate is treated as 1 bps.
    pub fn new(name: impl Into<String>, rate_bps: BasisPoints) -> Self {
        Self {
            name: name.into(),
            rate_bps: AtomicU32::new(rate_bps.max(1)),
            positions: Mutex::new(HashMap::new()),
        }
    }

    pub fn rate_bps(&self) -> BasisPoints {
        self.rate_bps.load(Ordering::Relaxed)
    }

    pub fn set_rate_bps(&self, rate_bps: BasisPoints) {
        self.rate_bps.store(rate_bps.max(1), Ordering::Relaxed);
    }

    fn overflow(&self) -> ProtocolError {
        ProtocolError::Overflow {
            protocol: self.name.clone(),
        }
    }
}

impl YieldProtocol for InMemoryProtocol {
    fn name(&self) -> &str {
        &self.name
    }

    fn position_of(&self, beneficiary: &AccountId) -> Amount {
        self.positions.lock().get(beneficiary).copied().unwrap_or(0)
    }

    fn mint(&self, beneficiary: &AccountId, amount: Amount) -> Result<Amount, ProtocolError> {
        let minted = amount
            .checked_mul(Amount::from(self.rate_bps()))
            .ok_or_else(|| self.overflow())?
            / Amount::from(BPS_DENOMINATOR);

        let mut positions = self.positions.lock();
        let position = positions.entry(beneficiary.clone()).or_insert(0);
        *position = position.checked_add(minted).ok_or_else(|| self.overflow())?;
        Ok(minted)
    }

    fn redeem(&self, beneficiary: &AccountId, amount: Amount) -> Result<Amount, ProtocolError> {
        let released = amount
            .checked_mul(Amount::from(BPS_DENOMINATOR))
            .ok_or_else(|| self.overflow())?
            / Amount::from(self.rate_bps());

        let mut positions = self.positions.lock();
        let available = positions.get(beneficiary).copied().unwrap_or(0);
        if available < amount {
            return Err(ProtocolError::InsufficientPosition {
                protocol: self.name.clone(),
                beneficiary: beneficiary.clone(),
                available,
                required: amount,
            });
        }
        positions.insert(beneficiary.clone(), available - amount);
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_par_rate_is_one_to_one() {
        let protocol = InMemoryProtocol::new("Idle RA", BPS_DENOMINATOR);
        let custody = AccountId::new("root-custody");

        assert_eq!(protocol.mint(&custody, 27).unwrap(), 27);
        assert_eq!(protocol.position_of(&custody), 27);
        assert_eq!(protocol.redeem(&custody, 27).unwrap(), 27);
        assert_eq!(protocol.position_of(&custody), 0);
    }

    #[test]
    fn test_rate_change_yields() {
        let protocol = InMemoryProtocol::new("Idle BY", BPS_DENOMINATOR);
        let custody = AccountId::new("root-custody");
        protocol.mint(&custody, 100).unwrap();

        protocol.set_rate_bps(8_000);
        assert_eq!(protocol.redeem(&custody, 100).unwrap(), 125);
    }

    #[test]
    fn test_redeem_more_than_position() {
        let protocol = InMemoryProtocol::new("Idle BY", BPS_DENOMINATOR);
        let custody = AccountId::new("root-custody");
        protocol.mint(&custody, 10).unwrap();

        assert!(matches!(
            protocol.redeem(&custody, 11).unwrap_err(),
            ProtocolError::InsufficientPosition { available: 10, required: 11, .. }
        ));
        assert_eq!(protocol.position_of(&custody), 10);
    }
}
