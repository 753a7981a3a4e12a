//! Weighted Distribution Algorithm
//!
//! Pure integer arithmetic shared by both domains. No state, no I/O.
//!
//! - **Invest split** (root): `mint[p] = Σ_d agg[d] * w[d][p] / 10000`
//! - **Minted share** (child): `demand[u][p] = Σ_d c[u][d] * w[d][p]`,
//!   `share[u][p] = mint[p] * demand[u][p] / Σ_u demand[u][p]`
//! - **Proceeds share** (child): `proceeds[u] = Σ_p redeemed[p] * sold[u][p] / Σ_u sold[u][p]`
//!
//! Every division floors. The remainder is never redistributed; it stays in
//! custody and is reported as `dust` so callers can account for it.

use crate::shared::protocol::{AccountId, Amount, BasisPoints, BPS_DENOMINATOR};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DistributionError {
    #[error("weight matrix has {rows} rows, expected {expected}")]
    RowCountMismatch { rows: usize, expected: usize },

    #[error("weight row {row} has {len} entries, expected {expected}")]
    ColumnCountMismatch { row: usize, len: usize, expected: usize },

    #[error("entry for {user} has {len} amounts, expected {expected}")]
    EntryLengthMismatch {
        user: AccountId,
        len: usize,
        expected: usize,
    },

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
}

/// Per-user shares plus the per-column remainder left by floor division.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation<T> {
    pub shares: BTreeMap<AccountId, T>,
    pub dust: Vec<Amount>,
}

impl<T> Allocation<T> {
    pub fn total_dust(&self) -> Amount {
        self.dust.iter().sum()
    }
}

/// `floor(a * b / denominator)`, zero when the denominator is zero.
#[inline]
fn mul_div_floor(
    a: Amount,
    b: Amount,
    denominator: Amount,
    context: &'static str,
) -> Result<Amount, DistributionError> {
    if denominator == 0 {
        return Ok(0);
    }
    a.checked_mul(b)
        .map(|product| product / denominator)
        .ok_or(DistributionError::Overflow(context))
}

fn check_matrix(
    weights: &[Vec<BasisPoints>],
    rows: usize,
    columns: usize,
) -> Result<(), DistributionError> {
    if weights.len() != rows {
        return Err(DistributionError::RowCountMismatch {
            rows: weights.len(),
            expected: rows,
        });
    }
    for (row, entries) in weights.iter().enumerate() {
        if entries.len() != columns {
            return Err(DistributionError::ColumnCountMismatch {
                row,
                len: entries.len(),
                expected: columns,
            });
        }
    }
    Ok(())
}

/// Σ_d amounts[d] * w[d][p] for every protocol `p`, before dividing by the
/// bps denominator.
fn weighted_sums(
    amounts: &[Amount],
    weights: &[Vec<BasisPoints>],
    protocol_count: usize,
) -> Result<Vec<Amount>, DistributionError> {
    let mut sums = vec![0 as Amount; protocol_count];
    for (amount, row) in amounts.iter().zip(weights) {
        for (sum, &weight) in sums.iter_mut().zip(row) {
            let term = amount
                .checked_mul(Amount::from(weight))
                .ok_or(DistributionError::Overflow("weighted sum"))?;
            *sum = sum
                .checked_add(term)
                .ok_or(DistributionError::Overflow("weighted sum"))?;
        }
    }
    Ok(sums)
}

/// Invest split executed by the root domain.
///
/// `aggregates` holds one entry per portfolio; the result holds one base-asset
/// amount per protocol.
pub fn invest_split(
    aggregates: &[Amount],
    weights: &[Vec<BasisPoints>],
    protocol_count: usize,
) -> Result<Vec<Amount>, DistributionError> {
    check_matrix(weights, aggregates.len(), protocol_count)?;
    let sums = weighted_sums(aggregates, weights, protocol_count)?;
    Ok(sums
        .into_iter()
        .map(|sum| sum / Amount::from(BPS_DENOMINATOR))
        .collect())
}

/// A user's weighted demand per protocol (not yet divided by the bps denominator).
pub fn weighted_demand(
    contribution: &[Amount],
    weights: &[Vec<BasisPoints>],
    protocol_count: usize,
) -> Result<Vec<Amount>, DistributionError> {
    check_matrix(weights, contribution.len(), protocol_count)?;
    weighted_sums(contribution, weights, protocol_count)
}

/// Splits the minted protocol tokens of a deposit batch among its contributors.
///
/// `contributions` maps each user to one amount per portfolio. A protocol with
/// zero total demand distributes nothing.
pub fn allocate_minted(
    minted: &[Amount],
    weights: &[Vec<BasisPoints>],
    contributions: &BTreeMap<AccountId, Vec<Amount>>,
) -> Result<Allocation<Vec<Amount>>, DistributionError> {
    let protocol_count = minted.len();
    let portfolio_count = weights.len();
    check_matrix(weights, portfolio_count, protocol_count)?;

    let mut demands = BTreeMap::new();
    let mut total_demand = vec![0 as Amount; protocol_count];
    for (user, contribution) in contributions {
        if contribution.len() != portfolio_count {
            return Err(DistributionError::EntryLengthMismatch {
                user: user.clone(),
                len: contribution.len(),
                expected: portfolio_count,
            });
        }
        let demand = weighted_sums(contribution, weights, protocol_count)?;
        for (total, d) in total_demand.iter_mut().zip(&demand) {
            *total = total
                .checked_add(*d)
                .ok_or(DistributionError::Overflow("total demand"))?;
        }
        demands.insert(user.clone(), demand);
    }

    let mut shares = BTreeMap::new();
    let mut distributed = vec![0 as Amount; protocol_count];
    for (user, demand) in demands {
        let mut user_shares = Vec::with_capacity(protocol_count);
        for p in 0..protocol_count {
            let share = mul_div_floor(minted[p], demand[p], total_demand[p], "minted share")?;
            distributed[p] += share;
            user_shares.push(share);
        }
        shares.insert(user, user_shares);
    }

    let dust = minted
        .iter()
        .zip(&distributed)
        .map(|(m, d)| m - d)
        .collect();

    Ok(Allocation { shares, dust })
}

/// Splits the redeemed base asset of a sell batch among its sellers.
///
/// `sold` maps each user to one token amount per protocol; the result maps each
/// user to the summed base-asset proceeds across protocols.
pub fn allocate_proceeds(
    redeemed: &[Amount],
    sold: &BTreeMap<AccountId, Vec<Amount>>,
) -> Result<Allocation<Amount>, DistributionError> {
    let token_count = redeemed.len();

    let mut total_sold = vec![0 as Amount; token_count];
    for (user, amounts) in sold {
        if amounts.len() != token_count {
            return Err(DistributionError::EntryLengthMismatch {
                user: user.clone(),
                len: amounts.len(),
                expected: token_count,
            });
        }
        for (total, a) in total_sold.iter_mut().zip(amounts) {
            *total = total
                .checked_add(*a)
                .ok_or(DistributionError::Overflow("total sold"))?;
        }
    }

    let mut shares = BTreeMap::new();
    let mut distributed = vec![0 as Amount; token_count];
    for (user, amounts) in sold {
        let mut proceeds: Amount = 0;
        for p in 0..token_count {
            let share = mul_div_floor(redeemed[p], amounts[p], total_sold[p], "proceeds share")?;
            distributed[p] += share;
            proceeds = proceeds
                .checked_add(share)
                .ok_or(DistributionError::Overflow("proceeds"))?;
        }
        shares.insert(user.clone(), proceeds);
    }

    let dust = redeemed
        .iter()
        .zip(&distributed)
        .map(|(r, d)| r - d)
        .collect();

    Ok(Allocation { shares, dust })
}

/// Token amount moved by a sell request: `floor(balance * pct / 10000)`.
pub fn sell_amount(balance: Amount, percentage: BasisPoints) -> Result<Amount, DistributionError> {
    mul_div_floor(
        balance,
        Amount::from(percentage),
        Amount::from(BPS_DENOMINATOR),
        "sell amount",
    )
}
