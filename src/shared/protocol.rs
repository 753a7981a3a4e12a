use serde::{Deserialize, Serialize};
use std::fmt;

/// 金额统一使用整数表示，避免浮点数精度问题
pub type Amount = u128;

/// 基点（万分之一）
pub type BasisPoints = u32;

/// 批次序号，按批次类型各自单调递增
pub type BatchId = u64;

/// 基点分母：10 000 bps = 100%
pub const BPS_DENOMINATOR: BasisPoints = 10_000;

/// Portfolio x protocol weight matrix, one row per portfolio.
pub type WeightMatrix = Vec<Vec<BasisPoints>>;

/// 账户标识（用户、托管账户、桥接端点）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// 代币标识（基础资产或协议代币）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenId(String);

impl TokenId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TokenId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// 批次类型，线上编码 Deposit=0, Sell=1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BatchType {
    Deposit = 0,
    Sell = 1,
}

impl BatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchType::Deposit => "deposit",
            BatchType::Sell => "sell",
        }
    }
}

impl fmt::Display for BatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for BatchType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BatchType::Deposit),
            1 => Ok(BatchType::Sell),
            other => Err(other),
        }
    }
}

/// Identifies one batch across both domains.
///
/// The root domain keys its pending relays by handle, so a deposit batch and a
/// sell batch sharing a sequence number never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchHandle {
    pub batch_type: BatchType,
    pub id: BatchId,
}

impl BatchHandle {
    pub fn new(batch_type: BatchType, id: BatchId) -> Self {
        Self { batch_type, id }
    }

    pub fn deposit(id: BatchId) -> Self {
        Self::new(BatchType::Deposit, id)
    }

    pub fn sell(id: BatchId) -> Self {
        Self::new(BatchType::Sell, id)
    }
}

impl fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.batch_type, self.id)
    }
}

/// 双域之间传递的不可变消息
///
/// `weight_matrix` 仅在根域返回的 Deposit 响应中非空。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelMessage {
    pub batch_type: BatchType,
    pub id: BatchId,
    pub weight_matrix: WeightMatrix,
    pub amounts: Vec<Amount>,
}

impl TunnelMessage {
    /// Message sent by the child domain when a batch is fired.
    pub fn fired(handle: BatchHandle, amounts: Vec<Amount>) -> Self {
        Self {
            batch_type: handle.batch_type,
            id: handle.id,
            weight_matrix: Vec::new(),
            amounts,
        }
    }

    pub fn handle(&self) -> BatchHandle {
        BatchHandle::new(self.batch_type, self.id)
    }
}

/// Which ledger a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    Child,
    Root,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Child => "child",
            Domain::Root => "root",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 隧道帧内容：发送端身份 + 消息体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelEnvelope {
    pub sender: AccountId,
    pub message: TunnelMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_type_wire_values() {
        assert_eq!(BatchType::Deposit as u8, 0);
        assert_eq!(BatchType::Sell as u8, 1);
        assert_eq!(BatchType::try_from(1), Ok(BatchType::Sell));
        assert_eq!(BatchType::try_from(7), Err(7));
    }

    #[test]
    fn test_fired_message_has_empty_weights() {
        let msg = TunnelMessage::fired(BatchHandle::deposit(3), vec![400, 1100, 600]);
        assert!(msg.weight_matrix.is_empty());
        assert_eq!(msg.handle(), BatchHandle::deposit(3));
    }

    #[test]
    fn test_handles_differ_by_type() {
        assert_ne!(BatchHandle::deposit(0), BatchHandle::sell(0));
        assert_eq!(BatchHandle::sell(4).to_string(), "sell#4");
    }
}
