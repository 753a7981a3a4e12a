/// Router Service - Root Domain Actor
///
/// Same shape as the batcher service: one task owns the `RootRouter` and
/// handles commands and inbound frames one at a time. With `auto_relay` the
/// service relays each processed batch straight back as the current operator;
/// otherwise results wait in the pending-relay table for an explicit `relay`.

use super::ServiceError;
use crate::application::router::{PendingRelay, RootRouter, RouterError, RouterWiring};
use crate::domain::events::EventRecord;
use crate::domain::ports::YieldProtocol;
use crate::domain::registry::Portfolio;
use crate::infrastructure::tunnel::{Tunnel, TunnelReceiver};
use crate::shared::metrics::METRICS;
use crate::shared::protocol::{AccountId, BasisPoints, BatchHandle, Domain};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

type Reply<T> = oneshot::Sender<Result<T, RouterError>>;

/// Commands the router actor accepts
pub enum RouterCommand {
    Init {
        caller: AccountId,
        wiring: RouterWiring,
        reply: Reply<()>,
    },
    SetTunnel {
        caller: AccountId,
        tunnel: Arc<dyn Tunnel>,
        reply: Reply<()>,
    },
    SetOperator {
        caller: AccountId,
        operator: AccountId,
        reply: Reply<()>,
    },
    AddPortfolio {
        caller: AccountId,
        name: String,
        reply: Reply<usize>,
    },
    AddProtocol {
        caller: AccountId,
        protocol: Arc<dyn YieldProtocol>,
        reply: Reply<usize>,
    },
    SetPortfolioWeights {
        caller: AccountId,
        portfolio: usize,
        weights: Vec<BasisPoints>,
        reply: Reply<()>,
    },
    Relay {
        caller: AccountId,
        handle: BatchHandle,
        reply: Reply<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<RouterSnapshot>,
    },
}

#[derive(Debug, Clone)]
pub struct RouterServiceConfig {
    /// 处理完成后立即回传
    pub auto_relay: bool,
    pub event_capacity: usize,
}

impl Default for RouterServiceConfig {
    fn default() -> Self {
        Self {
            auto_relay: true,
            event_capacity: 1024,
        }
    }
}

/// 根域状态快照
#[derive(Debug, Clone, Serialize)]
pub struct RouterSnapshot {
    pub portfolios: Vec<Portfolio>,
    pub protocols: Vec<String>,
    pub pending: Vec<PendingRelay>,
    pub processed: usize,
}

pub struct RouterService {
    router: RootRouter,
    commands: mpsc::UnboundedReceiver<RouterCommand>,
    inbox: TunnelReceiver,
    events: broadcast::Sender<EventRecord>,
    config: RouterServiceConfig,
}

impl RouterService {
    pub fn spawn(
        router: RootRouter,
        inbox: TunnelReceiver,
        config: RouterServiceConfig,
    ) -> (RouterHandle, JoinHandle<()>) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let handle = RouterHandle {
            commands: command_tx,
            events: events.clone(),
        };
        let service = Self {
            router,
            commands,
            inbox,
            events,
            config,
        };
        (handle, tokio::spawn(service.run()))
    }

    pub async fn run(mut self) {
        info!(auto_relay = self.config.auto_relay, "router service started");
        let mut inbox_open = true;
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                frame = self.inbox.recv(), if inbox_open => match frame {
                    Some(Ok(envelope)) => {
                        let handle = envelope.message.handle();
                        match self.router.on_inbound_message(envelope) {
                            Ok(handle) => {
                                if self.config.auto_relay {
                                    self.auto_relay(handle);
                                }
                            }
                            Err(e) => {
                                warn!(%handle, error = %e, "inbound message rejected");
                                METRICS
                                    .rejected_messages_total
                                    .with_label_values(&[Domain::Root.as_str(), e.kind().as_str()])
                                    .inc();
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "undecodable frame dropped");
                        METRICS
                            .rejected_messages_total
                            .with_label_values(&[Domain::Root.as_str(), "malformed"])
                            .inc();
                    }
                    None => inbox_open = false,
                },
            }
            self.publish_events();
        }
        info!("router service stopped");
    }

    fn handle_command(&mut self, command: RouterCommand) {
        match command {
            RouterCommand::Init {
                caller,
                wiring,
                reply,
            } => respond(reply, self.router.init(&caller, wiring)),
            RouterCommand::SetTunnel {
                caller,
                tunnel,
                reply,
            } => respond(reply, self.router.set_tunnel(&caller, tunnel)),
            RouterCommand::SetOperator {
                caller,
                operator,
                reply,
            } => respond(reply, self.router.set_operator(&caller, operator)),
            RouterCommand::AddPortfolio {
                caller,
                name,
                reply,
            } => respond(reply, self.router.add_portfolio(&caller, &name)),
            RouterCommand::AddProtocol {
                caller,
                protocol,
                reply,
            } => respond(reply, self.router.add_protocol(&caller, protocol)),
            RouterCommand::SetPortfolioWeights {
                caller,
                portfolio,
                weights,
                reply,
            } => respond(
                reply,
                self.router.set_portfolio_weights(&caller, portfolio, weights),
            ),
            RouterCommand::Relay {
                caller,
                handle,
                reply,
            } => respond(reply, self.router.relay(&caller, handle)),
            RouterCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn auto_relay(&mut self, handle: BatchHandle) {
        let operator = self.router.operator().clone();
        if let Err(e) = self.router.relay(&operator, handle) {
            warn!(%handle, error = %e, "automatic relay failed, result kept for manual relay");
            record_error(&e);
        }
    }

    fn snapshot(&self) -> RouterSnapshot {
        RouterSnapshot {
            portfolios: self.router.portfolios().to_vec(),
            protocols: self.router.protocol_names(),
            pending: self.router.pending_relays().cloned().collect(),
            processed: self.router.processed_count(),
        }
    }

    fn publish_events(&mut self) {
        for record in self.router.drain_events() {
            info!(domain = "root", event = record.event.name(), "event");
            let _ = self.events.send(record);
        }
    }
}

fn record_error(error: &RouterError) {
    METRICS
        .errors_total
        .with_label_values(&[Domain::Root.as_str(), error.kind().as_str()])
        .inc();
}

fn respond<T>(reply: Reply<T>, result: Result<T, RouterError>) {
    if let Err(e) = &result {
        warn!(error = %e, "router command failed");
        record_error(e);
    }
    let _ = reply.send(result);
}

/// Cloneable handle to a running router service
#[derive(Clone)]
pub struct RouterHandle {
    commands: mpsc::UnboundedSender<RouterCommand>,
    events: broadcast::Sender<EventRecord>,
}

impl RouterHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> RouterCommand,
    ) -> Result<T, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| ServiceError::Stopped(Domain::Root))?;
        let result = response
            .await
            .map_err(|_| ServiceError::Stopped(Domain::Root))?;
        Ok(result?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }

    pub async fn init(&self, caller: &AccountId, wiring: RouterWiring) -> Result<(), ServiceError> {
        self.request(|reply| RouterCommand::Init {
            caller: caller.clone(),
            wiring,
            reply,
        })
        .await
    }

    pub async fn set_tunnel(&self, caller: &AccountId, tunnel: Arc<dyn Tunnel>) -> Result<(), ServiceError> {
        self.request(|reply| RouterCommand::SetTunnel {
            caller: caller.clone(),
            tunnel,
            reply,
        })
        .await
    }

    pub async fn set_operator(&self, caller: &AccountId, operator: AccountId) -> Result<(), ServiceError> {
        self.request(|reply| RouterCommand::SetOperator {
            caller: caller.clone(),
            operator,
            reply,
        })
        .await
    }

    pub async fn add_portfolio(&self, caller: &AccountId, name: &str) -> Result<usize, ServiceError> {
        self.request(|reply| RouterCommand::AddPortfolio {
            caller: caller.clone(),
            name: name.to_string(),
            reply,
        })
        .await
    }

    pub async fn add_protocol(
        &self,
        caller: &AccountId,
        protocol: Arc<dyn YieldProtocol>,
    ) -> Result<usize, ServiceError> {
        self.request(|reply| RouterCommand::AddProtocol {
            caller: caller.clone(),
            protocol,
            reply,
        })
        .await
    }

    pub async fn set_portfolio_weights(
        &self,
        caller: &AccountId,
        portfolio: usize,
        weights: Vec<BasisPoints>,
    ) -> Result<(), ServiceError> {
        self.request(|reply| RouterCommand::SetPortfolioWeights {
            caller: caller.clone(),
            portfolio,
            weights,
            reply,
        })
        .await
    }

    /// Relays a processed batch result to the child domain.
    pub async fn relay(&self, caller: &AccountId, handle: BatchHandle) -> Result<usize, ServiceError> {
        self.request(|reply| RouterCommand::Relay {
            caller: caller.clone(),
            handle,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<RouterSnapshot, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(RouterCommand::Snapshot { reply })
            .map_err(|_| ServiceError::Stopped(Domain::Root))?;
        response
            .await
            .map_err(|_| ServiceError::Stopped(Domain::Root))
    }
}
