/// Batcher Service - Child Domain Actor
///
/// Owns a `ChildBatcher` and serialises every operation on it: commands from
/// handles and frames from the tunnel inbox are processed one at a time by a
/// single task, so no caller ever observes a half-updated batch.
///
/// ## Architecture
/// - Receives commands via MPSC channel, each with a oneshot reply
/// - Receives root responses from its `TunnelReceiver`
/// - Broadcasts every local event to subscribers
/// - Optionally settles (distribute/retrieve) a batch as soon as it is processed
///
/// ## Usage
/// ```rust,ignore
/// let (handle, task) = BatcherService::spawn(batcher, child_inbox, BatcherServiceConfig::default());
/// handle.deposit(&alice, 100, 0).await?;
/// handle.execute_batch(&operator, BatchType::Deposit).await?;
/// ```

use super::ServiceError;
use crate::application::batcher::{BatcherError, ChildBatcher};
use crate::domain::batch::{Batch, BatchBook, BatchStatus};
use crate::domain::distribution::Allocation;
use crate::domain::events::EventRecord;
use crate::domain::ports::AssetLedger;
use crate::domain::registry::ProtocolToken;
use crate::infrastructure::tunnel::TunnelReceiver;
use crate::shared::metrics::METRICS;
use crate::shared::protocol::{
    AccountId, Amount, BasisPoints, BatchHandle, BatchId, BatchType, Domain, TokenId,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

type Reply<T> = oneshot::Sender<Result<T, BatcherError>>;

/// Commands the batcher actor accepts
#[derive(Debug)]
pub enum BatcherCommand {
    AddPortfolio {
        caller: AccountId,
        name: String,
        reply: Reply<usize>,
    },
    AddProtocolToken {
        caller: AccountId,
        name: String,
        token: TokenId,
        reply: Reply<usize>,
    },
    SetOperator {
        caller: AccountId,
        operator: AccountId,
        reply: Reply<()>,
    },
    Deposit {
        caller: AccountId,
        amount: Amount,
        portfolio: usize,
        reply: Reply<BatchId>,
    },
    Sell {
        caller: AccountId,
        percentages: Vec<BasisPoints>,
        reply: Reply<BatchId>,
    },
    ExecuteBatch {
        caller: AccountId,
        batch_type: BatchType,
        reply: Reply<BatchHandle>,
    },
    Distribute {
        caller: AccountId,
        id: BatchId,
        reply: Reply<Allocation<Vec<Amount>>>,
    },
    Retrieve {
        caller: AccountId,
        id: BatchId,
        reply: Reply<Allocation<Amount>>,
    },
    Snapshot {
        reply: oneshot::Sender<BatcherSnapshot>,
    },
}

#[derive(Debug, Clone)]
pub struct BatcherServiceConfig {
    /// 批次处理完成后自动分发/赎回
    pub auto_settle: bool,
    /// 事件广播缓冲
    pub event_capacity: usize,
}

impl Default for BatcherServiceConfig {
    fn default() -> Self {
        Self {
            auto_settle: false,
            event_capacity: 1024,
        }
    }
}

/// Serializable view of one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchView {
    pub id: BatchId,
    pub status: BatchStatus,
    pub totals: Vec<Amount>,
    pub result: Vec<Amount>,
    pub contributors: usize,
}

impl From<&Batch> for BatchView {
    fn from(batch: &Batch) -> Self {
        Self {
            id: batch.id,
            status: batch.status,
            totals: batch.totals().to_vec(),
            result: batch.result().to_vec(),
            contributors: batch.contributions().len(),
        }
    }
}

/// 子域状态快照
#[derive(Debug, Clone, Serialize)]
pub struct BatcherSnapshot {
    pub deposit_batch_id: BatchId,
    pub sell_batch_id: BatchId,
    pub deposit_batches: Vec<BatchView>,
    pub sell_batches: Vec<BatchView>,
    pub deposit_per_user: BTreeMap<AccountId, Amount>,
    pub portfolios: Vec<String>,
    pub tokens: Vec<ProtocolToken>,
}

impl BatcherSnapshot {
    pub fn batch(&self, batch_type: BatchType, id: BatchId) -> Option<&BatchView> {
        let batches = match batch_type {
            BatchType::Deposit => &self.deposit_batches,
            BatchType::Sell => &self.sell_batches,
        };
        batches.iter().find(|b| b.id == id)
    }
}

fn views(book: &BatchBook) -> Vec<BatchView> {
    book.iter().map(BatchView::from).collect()
}

pub struct BatcherService<L: AssetLedger> {
    batcher: ChildBatcher<L>,
    commands: mpsc::UnboundedReceiver<BatcherCommand>,
    inbox: TunnelReceiver,
    events: broadcast::Sender<EventRecord>,
    config: BatcherServiceConfig,
}

impl<L: AssetLedger + 'static> BatcherService<L> {
    /// Spawns the actor and returns a cloneable handle to it.
    pub fn spawn(
        batcher: ChildBatcher<L>,
        inbox: TunnelReceiver,
        config: BatcherServiceConfig,
    ) -> (BatcherHandle, JoinHandle<()>) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let handle = BatcherHandle {
            commands: command_tx,
            events: events.clone(),
        };
        let service = Self {
            batcher,
            commands,
            inbox,
            events,
            config,
        };
        (handle, tokio::spawn(service.run()))
    }

    /// Runs until every handle is dropped.
    pub async fn run(mut self) {
        info!(auto_settle = self.config.auto_settle, "batcher service started");
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
                        match self.batcher.on_inbound_message(envelope) {
                            Ok(handle) => {
                                if self.config.auto_settle {
                                    self.settle(handle);
                                }
                            }
                            Err(e) => {
                                warn!(%handle, error = %e, "inbound message rejected");
                                METRICS
                                    .rejected_messages_total
                                    .with_label_values(&[Domain::Child.as_str(), e.kind().as_str()])
                                    .inc();
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "undecodable frame dropped");
                        METRICS
                            .rejected_messages_total
                            .with_label_values(&[Domain::Child.as_str(), "malformed"])
                            .inc();
                    }
                    None => inbox_open = false,
                },
            }
            self.publish_events();
        }
        info!("batcher service stopped");
    }

    fn handle_command(&mut self, command: BatcherCommand) {
        match command {
            BatcherCommand::AddPortfolio { caller, name, reply } => {
                let result = self.batcher.add_portfolio(&caller, &name);
                respond(reply, result);
            }
            BatcherCommand::AddProtocolToken {
                caller,
                name,
                token,
                reply,
            } => {
                let result = self.batcher.add_protocol_token(&caller, &name, token);
                respond(reply, result);
            }
            BatcherCommand::SetOperator {
                caller,
                operator,
                reply,
            } => {
                let result = self.batcher.set_operator(&caller, operator);
                respond(reply, result);
            }
            BatcherCommand::Deposit {
                caller,
                amount,
                portfolio,
                reply,
            } => {
                let result = self.batcher.deposit(&caller, amount, portfolio);
                respond(reply, result);
            }
            BatcherCommand::Sell {
                caller,
                percentages,
                reply,
            } => {
                let result = self.batcher.sell(&caller, &percentages);
                respond(reply, result);
            }
            BatcherCommand::ExecuteBatch {
                caller,
                batch_type,
                reply,
            } => {
                let result = self.batcher.fire(&caller, batch_type);
                respond(reply, result);
            }
            BatcherCommand::Distribute { caller, id, reply } => {
                let result = self.batcher.distribute(&caller, id);
                respond(reply, result);
            }
            BatcherCommand::Retrieve { caller, id, reply } => {
                let result = self.batcher.retrieve(&caller, id);
                respond(reply, result);
            }
            BatcherCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn settle(&mut self, handle: BatchHandle) {
        let operator = self.batcher.operator().clone();
        let result = match handle.batch_type {
            BatchType::Deposit => self.batcher.distribute(&operator, handle.id).map(|_| ()),
            BatchType::Sell => self.batcher.retrieve(&operator, handle.id).map(|_| ()),
        };
        if let Err(e) = result {
            warn!(%handle, error = %e, "automatic settlement failed");
            record_error(&e);
        }
    }

    fn snapshot(&self) -> BatcherSnapshot {
        BatcherSnapshot {
            deposit_batch_id: self.batcher.deposit_batch_id(),
            sell_batch_id: self.batcher.sell_batch_id(),
            deposit_batches: views(self.batcher.batches(BatchType::Deposit)),
            sell_batches: views(self.batcher.batches(BatchType::Sell)),
            deposit_per_user: self.batcher.deposits_per_user().clone(),
            portfolios: self.batcher.portfolios().to_vec(),
            tokens: self.batcher.tokens().to_vec(),
        }
    }

    fn publish_events(&mut self) {
        for record in self.batcher.drain_events() {
            info!(domain = "child", event = record.event.name(), "event");
            // 没有订阅者时发送失败，这是正常现象
            let _ = self.events.send(record);
        }
    }
}

fn record_error(error: &BatcherError) {
    METRICS
        .errors_total
        .with_label_values(&[Domain::Child.as_str(), error.kind().as_str()])
        .inc();
}

fn respond<T>(reply: Reply<T>, result: Result<T, BatcherError>) {
    if let Err(e) = &result {
        warn!(error = %e, "batcher command failed");
        record_error(e);
    }
    // 调用方已放弃等待时丢弃结果
    let _ = reply.send(result);
}

/// Cloneable handle to a running batcher service
#[derive(Clone)]
pub struct BatcherHandle {
    commands: mpsc::UnboundedSender<BatcherCommand>,
    events: broadcast::Sender<EventRecord>,
}

impl BatcherHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> BatcherCommand,
    ) -> Result<T, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| ServiceError::Stopped(Domain::Child))?;
        let result = response
            .await
            .map_err(|_| ServiceError::Stopped(Domain::Child))?;
        Ok(result?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }

    pub async fn add_portfolio(&self, caller: &AccountId, name: &str) -> Result<usize, ServiceError> {
        self.request(|reply| BatcherCommand::AddPortfolio {
            caller: caller.clone(),
            name: name.to_string(),
            reply,
        })
        .await
    }

    pub async fn add_protocol_token(
        &self,
        caller: &AccountId,
        name: &str,
        token: TokenId,
    ) -> Result<usize, ServiceError> {
        self.request(|reply| BatcherCommand::AddProtocolToken {
            caller: caller.clone(),
            name: name.to_string(),
            token,
            reply,
        })
        .await
    }

    pub async fn set_operator(&self, caller: &AccountId, operator: AccountId) -> Result<(), ServiceError> {
        self.request(|reply| BatcherCommand::SetOperator {
            caller: caller.clone(),
            operator,
            reply,
        })
        .await
    }

    pub async fn deposit(
        &self,
        caller: &AccountId,
        amount: Amount,
        portfolio: usize,
    ) -> Result<BatchId, ServiceError> {
        self.request(|reply| BatcherCommand::Deposit {
            caller: caller.clone(),
            amount,
            portfolio,
            reply,
        })
        .await
    }

    pub async fn sell(
        &self,
        caller: &AccountId,
        percentages: Vec<BasisPoints>,
    ) -> Result<BatchId, ServiceError> {
        self.request(|reply| BatcherCommand::Sell {
            caller: caller.clone(),
            percentages,
            reply,
        })
        .await
    }

    pub async fn execute_batch(
        &self,
        caller: &AccountId,
        batch_type: BatchType,
    ) -> Result<BatchHandle, ServiceError> {
        self.request(|reply| BatcherCommand::ExecuteBatch {
            caller: caller.clone(),
            batch_type,
            reply,
        })
        .await
    }

    pub async fn distribute(
        &self,
        caller: &AccountId,
        id: BatchId,
    ) -> Result<Allocation<Vec<Amount>>, ServiceError> {
        self.request(|reply| BatcherCommand::Distribute {
            caller: caller.clone(),
            id,
            reply,
        })
        .await
    }

    pub async fn retrieve(&self, caller: &AccountId, id: BatchId) -> Result<Allocation<Amount>, ServiceError> {
        self.request(|reply| BatcherCommand::Retrieve {
            caller: caller.clone(),
            id,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<BatcherSnapshot, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(BatcherCommand::Snapshot { reply })
            .map_err(|_| ServiceError::Stopped(Domain::Child))?;
        response
            .await
            .map_err(|_| ServiceError::Stopped(Domain::Child))
    }
}
