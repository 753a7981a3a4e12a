/// Application Layer - Domain State Machines and Services
///
/// This layer orchestrates domain logic into the two settlement domains. The
/// state machines are plain synchronous structs; the services wrap each in an
/// actor so the domains are scheduled independently.
///
/// ## Modules
/// - `batcher`: Child Domain Batcher
/// - `router`: Root Domain Router
/// - `services`: actor services and their handles

pub mod batcher;
pub mod router;
pub mod services;

// Re-export key types
pub use batcher::{BatcherConfig, BatcherError, ChildBatcher};
pub use router::{PendingRelay, RootRouter, RouterConfig, RouterError, RouterWiring};
pub use services::{
    BatcherHandle, BatcherService, BatcherServiceConfig, RouterHandle, RouterService,
    RouterServiceConfig, ServiceError,
};
