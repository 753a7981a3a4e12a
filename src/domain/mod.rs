/// Domain Layer - Core Settlement Logic
///
/// Pure business logic with no I/O: the weighted distribution arithmetic,
/// batch lifecycle records, registries, validation and access rules, plus
/// the ports through which the state machines reach their collaborators.
///
/// ## Modules
/// - `distribution`: Weighted Distribution Algorithm (pure functions)
/// - `batch`: Batch lifecycle and per-type batch sequences
/// - `registry`: Portfolio / protocol registries
/// - `validation`: Input rules
/// - `access`: Administrator / operator roles
/// - `events`: Local events
/// - `ports`: `AssetLedger` and `YieldProtocol` collaborator traits

pub mod access;
pub mod batch;
pub mod distribution;
pub mod error;
pub mod events;
pub mod ports;
pub mod registry;
pub mod validation;

// Re-export key types
pub use access::{AccessControl, AccessError};
pub use batch::{Batch, BatchBook, BatchStatus};
pub use distribution::{Allocation, DistributionError};
pub use error::ErrorKind;
pub use events::{EventLog, EventRecord, SettlementEvent};
pub use ports::{AssetLedger, LedgerError, LedgerOp, ProtocolError, YieldProtocol};
pub use registry::{Portfolio, PortfolioBook, ProtocolToken, TokenRegistry};
pub use validation::{RequestValidator, ValidationConfig, ValidationError};
