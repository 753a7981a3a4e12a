//! Batch lifecycle records.
//!
//! ```text
//! Open ──fire──▶ Fired ──inbound message──▶ Processed ──distribute/retrieve──▶ Settled
//! ```
//!
//! Only the open batch accepts contributions. Each `BatchBook` keeps one
//! sequence per batch type; ids start at 0 and never repeat.

use crate::domain::distribution::DistributionError;
use crate::shared::protocol::{AccountId, Amount, BatchHandle, BatchId, BatchType, WeightMatrix};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 批次生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// 正在累积用户请求
    Open,
    /// 已发往根域，等待响应
    Fired,
    /// 根域响应已到达
    Processed,
    /// 已完成分发/赎回，终态
    Settled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Open => "open",
            BatchStatus::Fired => "fired",
            BatchStatus::Processed => "processed",
            BatchStatus::Settled => "settled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub status: BatchStatus,
    /// 每个组合（Deposit）或每个协议代币（Sell）的累计金额
    totals: Vec<Amount>,
    /// 本批次内每个用户的贡献
    contributions: BTreeMap<AccountId, Vec<Amount>>,
    /// 根域返回的权重矩阵（仅 Deposit）
    weight_matrix: WeightMatrix,
    /// 根域返回的铸造/赎回结果
    result: Vec<Amount>,
    /// 触发时登记的协议代币数，根域响应必须与之等长
    response_width: usize,
}

/// A contribution checked against the open batch but not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StagedContribution {
    batch_id: BatchId,
    user: AccountId,
    totals: Vec<Amount>,
    contribution: Vec<Amount>,
}

impl Batch {
    fn open(id: BatchId) -> Self {
        Self {
            id,
            status: BatchStatus::Open,
            totals: Vec::new(),
            contributions: BTreeMap::new(),
            weight_matrix: Vec::new(),
            result: Vec::new(),
            response_width: 0,
        }
    }

    pub fn totals(&self) -> &[Amount] {
        &self.totals
    }

    pub fn contributions(&self) -> &BTreeMap<AccountId, Vec<Amount>> {
        &self.contributions
    }

    pub fn contribution_of(&self, user: &AccountId) -> Option<&[Amount]> {
        self.contributions.get(user).map(Vec::as_slice)
    }

    pub fn weight_matrix(&self) -> &WeightMatrix {
        &self.weight_matrix
    }

    pub fn result(&self) -> &[Amount] {
        &self.result
    }

    /// Protocol token count when the batch was fired.
    pub fn response_width(&self) -> usize {
        self.response_width
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    /// Totals padded to `width` entries.
    pub fn totals_padded(&self, width: usize) -> Vec<Amount> {
        let mut totals = self.totals.clone();
        totals.resize(width.max(totals.len()), 0);
        totals
    }

    /// Computes the totals and user contribution after adding `amounts[i]` to
    /// column `i`, without touching the batch.
    fn stage(
        &self,
        user: &AccountId,
        amounts: &[(usize, Amount)],
        width: usize,
    ) -> Result<StagedContribution, DistributionError> {
        let mut totals = self.totals_padded(width);
        let mut contribution = self
            .contributions
            .get(user)
            .cloned()
            .unwrap_or_default();
        contribution.resize(width.max(contribution.len()), 0);

        for &(index, amount) in amounts {
            totals[index] = totals[index]
                .checked_add(amount)
                .ok_or(DistributionError::Overflow("batch total"))?;
            contribution[index] = contribution[index]
                .checked_add(amount)
                .ok_or(DistributionError::Overflow("batch contribution"))?;
        }

        Ok(StagedContribution {
            batch_id: self.id,
            user: user.clone(),
            totals,
            contribution,
        })
    }

    fn seal(&mut self, width: usize, response_width: usize) {
        self.totals.resize(width.max(self.totals.len()), 0);
        for contribution in self.contributions.values_mut() {
            contribution.resize(width.max(contribution.len()), 0);
        }
        self.response_width = response_width;
        self.status = BatchStatus::Fired;
    }

    pub(crate) fn mark_processed(&mut self, weight_matrix: WeightMatrix, result: Vec<Amount>) {
        self.weight_matrix = weight_matrix;
        self.result = result;
        self.status = BatchStatus::Processed;
    }

    pub(crate) fn mark_settled(&mut self) {
        self.status = BatchStatus::Settled;
    }
}

/// One batch sequence (all deposit batches or all sell batches).
#[derive(Debug, Clone)]
pub struct BatchBook {
    batch_type: BatchType,
    current: BatchId,
    batches: BTreeMap<BatchId, Batch>,
}

impl BatchBook {
    pub fn new(batch_type: BatchType) -> Self {
        let mut batches = BTreeMap::new();
        batches.insert(0, Batch::open(0));
        Self {
            batch_type,
            current: 0,
            batches,
        }
    }

    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    /// Id of the batch currently accepting contributions.
    pub fn current_id(&self) -> BatchId {
        self.current
    }

    pub fn open_batch(&self) -> &Batch {
        &self.batches[&self.current]
    }

    pub fn get(&self, id: BatchId) -> Option<&Batch> {
        self.batches.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: BatchId) -> Option<&mut Batch> {
        self.batches.get_mut(&id)
    }

    pub fn status(&self, id: BatchId) -> Option<BatchStatus> {
        self.batches.get(&id).map(|b| b.status)
    }

    /// Checks a contribution against the open batch. Nothing changes until
    /// the result is passed to `commit`.
    pub(crate) fn stage(
        &self,
        user: &AccountId,
        amounts: &[(usize, Amount)],
        width: usize,
    ) -> Result<StagedContribution, DistributionError> {
        self.open_batch().stage(user, amounts, width)
    }

    /// Applies a staged contribution. A contribution staged against a batch
    /// that is no longer open is dropped.
    pub(crate) fn commit(&mut self, staged: StagedContribution) -> BatchId {
        if staged.batch_id == self.current {
            if let Some(batch) = self.batches.get_mut(&self.current) {
                batch.totals = staged.totals;
                batch.contributions.insert(staged.user, staged.contribution);
            }
        }
        self.current
    }

    /// Fires the open batch and opens the next one. Returns the fired handle.
    ///
    /// `response_width` is the protocol token count the root response must
    /// carry for this batch.
    pub(crate) fn fire(&mut self, width: usize, response_width: usize) -> BatchHandle {
        let fired = self.current;
        if let Some(batch) = self.batches.get_mut(&fired) {
            batch.seal(width, response_width);
        }
        self.current = fired + 1;
        self.batches.insert(self.current, Batch::open(self.current));
        BatchHandle::new(self.batch_type, fired)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Batch> {
        self.batches.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> AccountId {
        AccountId::new(name)
    }

    fn record(book: &mut BatchBook, name: &str, amounts: &[(usize, Amount)], width: usize) {
        let staged = book.stage(&user(name), amounts, width).unwrap();
        book.commit(staged);
    }

    #[test]
    fn test_totals_equal_sum_of_contributions() {
        let mut book = BatchBook::new(BatchType::Deposit);
        record(&mut book, "alice", &[(0, 100)], 3);
        record(&mut book, "alice", &[(1, 200)], 3);
        record(&mut book, "bob", &[(1, 300)], 3);
        record(&mut book, "carl", &[(2, 300)], 3);

        let batch = book.open_batch();
        for column in 0..3 {
            let sum: Amount = batch.contributions().values().map(|c| c[column]).sum();
            assert_eq!(batch.totals()[column], sum);
        }
        assert_eq!(batch.totals(), &[100, 500, 300]);
    }

    #[test]
    fn test_stage_leaves_batch_untouched() {
        let mut book = BatchBook::new(BatchType::Deposit);
        let staged = book.stage(&user("alice"), &[(0, 100)], 2).unwrap();
        assert!(book.open_batch().is_empty());

        assert_eq!(book.commit(staged), 0);
        assert_eq!(book.open_batch().totals(), &[100, 0]);
    }

    #[test]
    fn test_stale_stage_is_dropped() {
        let mut book = BatchBook::new(BatchType::Deposit);
        let staged = book.stage(&user("alice"), &[(0, 100)], 1).unwrap();
        book.fire(1, 2);

        assert_eq!(book.commit(staged), 1);
        assert!(book.open_batch().is_empty());
        assert!(book.get(0).unwrap().is_empty());
    }

    #[test]
    fn test_fire_opens_next_batch() {
        let mut book = BatchBook::new(BatchType::Sell);
        record(&mut book, "alice", &[(0, 5), (1, 7)], 2);

        let handle = book.fire(2, 2);
        assert_eq!(handle, BatchHandle::sell(0));
        assert_eq!(book.status(0), Some(BatchStatus::Fired));
        assert_eq!(book.current_id(), 1);
        assert_eq!(book.status(1), Some(BatchStatus::Open));
        assert!(book.open_batch().is_empty());
    }

    #[test]
    fn test_seal_pads_to_registered_width() {
        let mut book = BatchBook::new(BatchType::Deposit);
        record(&mut book, "alice", &[(0, 10)], 1);
        book.fire(3, 2);

        let batch = book.get(0).unwrap();
        assert_eq!(batch.totals(), &[10, 0, 0]);
        assert_eq!(batch.contribution_of(&user("alice")), Some(&[10, 0, 0][..]));
        assert_eq!(batch.response_width(), 2);
    }

    #[test]
    fn test_record_overflow_leaves_batch_unchanged() {
        let mut book = BatchBook::new(BatchType::Deposit);
        record(&mut book, "alice", &[(0, Amount::MAX)], 1);
        assert!(book.stage(&user("bob"), &[(0, 1)], 1).is_err());

        let batch = book.open_batch();
        assert_eq!(batch.totals(), &[Amount::MAX]);
        assert!(batch.contribution_of(&user("bob")).is_none());
    }
}
