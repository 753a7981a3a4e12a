/// Application Services
///
/// Each domain runs as its own actor task. The only channel between them is
/// the tunnel; handles talk to an actor through its command queue.

pub mod batcher_service;
pub mod router_service;

use crate::application::batcher::BatcherError;
use crate::application::router::RouterError;
use crate::domain::error::ErrorKind;
use crate::shared::protocol::Domain;

pub use batcher_service::{
    BatchView, BatcherCommand, BatcherHandle, BatcherService, BatcherServiceConfig,
    BatcherSnapshot,
};
pub use router_service::{
    RouterCommand, RouterHandle, RouterService, RouterServiceConfig, RouterSnapshot,
};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} domain service has stopped")]
    Stopped(Domain),

    #[error(transparent)]
    Batcher(#[from] BatcherError),

    #[error(transparent)]
    Router(#[from] RouterError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Stopped(_) => ErrorKind::Collaborator,
            ServiceError::Batcher(e) => e.kind(),
            ServiceError::Router(e) => e.kind(),
        }
    }
}
