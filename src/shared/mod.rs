/// Shared utilities and types used across all layers
///
/// This module contains:
/// - Protocol definitions (tunnel messages, batch handles, identifiers)
/// - Prometheus metrics
/// - Timestamps

pub mod protocol;
pub mod timestamp;
pub mod metrics;

// Re-export commonly used types
pub use protocol::{
    AccountId, Amount, BasisPoints, BatchHandle, BatchId, BatchType, Domain, TokenId,
    TunnelEnvelope, TunnelMessage, WeightMatrix, BPS_DENOMINATOR,
};

pub use timestamp::now_millis;
