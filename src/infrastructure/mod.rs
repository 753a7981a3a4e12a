/// Infrastructure Layer - Technical Implementations
///
/// This layer contains the collaborators the domain layer talks to through
/// its ports: the message tunnel between domains, the asset ledger, the
/// yield protocols, and the observability endpoints.
///
/// The infrastructure layer depends on the domain layer but the domain
/// layer does not depend on infrastructure (dependency inversion).
///
/// ## Modules
/// - `tunnel`: framed cross-domain message transport
/// - `ledger`: in-memory fungible token ledger
/// - `protocols`: in-memory yield protocols with a configurable rate
/// - `observability`: Prometheus metrics and health endpoints

pub mod ledger;
pub mod observability;
pub mod protocols;
pub mod tunnel;

// Re-export key types
pub use ledger::InMemoryLedger;
pub use observability::{HealthChecker, ObservabilityServer};
pub use protocols::InMemoryProtocol;
pub use tunnel::{InMemoryTunnel, Tunnel, TunnelCodec, TunnelError, TunnelReceiver};
