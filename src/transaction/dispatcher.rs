//! Transaction dispatcher
//!
//! The index is single-owner state; this actor is the owner. Protocol
//! handlers and workers talk to it through a cloneable handle whose mailbox
//! serializes every operation, so matching always observes all earlier adds
//! and updates. A timer drives the expiry sweep between commands.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sip::messages::{MessageError, Request, Response};
use crate::worker::WorkerHandle;

use super::index::TransactionIndex;
use super::record::{TransactionRecord, TransactionRef};

/// The dispatcher task is gone; no more transaction state exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transaction dispatcher is gone")]
pub struct DispatcherGone;

enum Command<D> {
    AddClient {
        method: String,
        branch: String,
        worker: WorkerHandle,
        reply: oneshot::Sender<Option<TransactionRef>>,
    },
    AddServer {
        request: Request,
        worker: WorkerHandle,
        reply: oneshot::Sender<Option<TransactionRef>>,
    },
    MatchRequest {
        request: Request,
        reply: oneshot::Sender<Result<Option<TransactionRecord<D>>, MessageError>>,
    },
    MatchResponse {
        response: Response,
        reply: oneshot::Sender<Result<Option<TransactionRecord<D>>, MessageError>>,
    },
    Update {
        record: TransactionRecord<D>,
    },
    SetResponseToTag {
        id: TransactionRef,
        tag: Option<String>,
    },
    DeleteByWorker {
        worker: WorkerHandle,
        reply: oneshot::Sender<usize>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
    DebugFormat {
        reply: oneshot::Sender<String>,
    },
}

/// Cloneable client side of the dispatcher mailbox.
#[derive(Debug, Clone)]
pub struct DispatcherHandle<D> {
    commands: mpsc::UnboundedSender<Command<D>>,
    cancel: CancellationToken,
}

/// Spawn the dispatcher task. `sweep_interval` paces the expiry sweep.
pub fn spawn<D>(sweep_interval: Duration) -> (DispatcherHandle<D>, JoinHandle<()>)
where
    D: Clone + Send + 'static,
{
    let (commands, receiver) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(receiver, cancel.clone(), sweep_interval));
    (DispatcherHandle { commands, cancel }, task)
}

async fn run<D>(
    mut commands: mpsc::UnboundedReceiver<Command<D>>,
    cancel: CancellationToken,
    sweep_interval: Duration,
) where
    D: Clone + Send + 'static,
{
    let mut index = TransactionIndex::<D>::new();
    let mut sweep = tokio::time::interval(sweep_interval);
    // The first tick fires immediately; skip it so an idle dispatcher does
    // not sweep before anything could have been added.
    sweep.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("transaction dispatcher shutting down with {} live transactions", index.len());
                break;
            }
            _ = sweep.tick() => {
                index.delete_expired();
            }
            command = commands.recv() => {
                match command {
                    Some(command) => handle(&mut index, command),
                    None => break,
                }
            }
        }
    }
}

fn handle<D>(index: &mut TransactionIndex<D>, command: Command<D>)
where
    D: Clone,
{
    match command {
        Command::AddClient {
            method,
            branch,
            worker,
            reply,
        } => {
            let _ = reply.send(index.add_client_transaction(&method, &branch, worker));
        }
        Command::AddServer {
            request,
            worker,
            reply,
        } => {
            let _ = reply.send(index.add_server_transaction(&request, worker));
        }
        Command::MatchRequest { request, reply } => {
            let result = index
                .get_server_transaction_for_request(&request)
                .map(|r| r.cloned());
            let _ = reply.send(result);
        }
        Command::MatchResponse { response, reply } => {
            let result = index
                .get_server_transaction_for_response(&response)
                .map(|r| r.cloned());
            let _ = reply.send(result);
        }
        Command::Update { record } => index.update(record),
        Command::SetResponseToTag { id, tag } => {
            index.set_response_to_tag(id, tag);
        }
        Command::DeleteByWorker { worker, reply } => {
            let _ = reply.send(index.delete_by_worker(&worker));
        }
        Command::Len { reply } => {
            let _ = reply.send(index.len());
        }
        Command::DebugFormat { reply } => {
            let _ = reply.send(index.debug_format());
        }
    }
}

impl<D> DispatcherHandle<D>
where
    D: Clone + Send + 'static,
{
    pub async fn add_client_transaction(
        &self,
        method: &str,
        branch: &str,
        worker: WorkerHandle,
    ) -> Result<Option<TransactionRef>, DispatcherGone> {
        self.request(|reply| Command::AddClient {
            method: method.to_string(),
            branch: branch.to_string(),
            worker,
            reply,
        })
        .await
    }

    pub async fn add_server_transaction(
        &self,
        request: Request,
        worker: WorkerHandle,
    ) -> Result<Option<TransactionRef>, DispatcherGone> {
        self.request(|reply| Command::AddServer {
            request,
            worker,
            reply,
        })
        .await
    }

    pub async fn match_request(
        &self,
        request: Request,
    ) -> Result<Result<Option<TransactionRecord<D>>, MessageError>, DispatcherGone> {
        self.request(|reply| Command::MatchRequest { request, reply })
            .await
    }

    pub async fn match_response(
        &self,
        response: Response,
    ) -> Result<Result<Option<TransactionRecord<D>>, MessageError>, DispatcherGone> {
        self.request(|reply| Command::MatchResponse { response, reply })
            .await
    }

    /// Fire-and-forget replacement of a record.
    pub fn update(&self, record: TransactionRecord<D>) {
        if self.commands.send(Command::Update { record }).is_err() {
            warn!("update dropped: {}", DispatcherGone);
        }
    }

    /// Fire-and-forget To-tag update, used right after a response is sent.
    pub fn set_response_to_tag(&self, id: TransactionRef, tag: Option<String>) {
        if self
            .commands
            .send(Command::SetResponseToTag { id, tag })
            .is_err()
        {
            warn!("set_response_to_tag dropped: {}", DispatcherGone);
        }
    }

    /// Called by the supervisor when a worker's death is reported.
    pub async fn delete_by_worker(
        &self,
        worker: WorkerHandle,
    ) -> Result<usize, DispatcherGone> {
        self.request(|reply| Command::DeleteByWorker { worker, reply })
            .await
    }

    pub async fn len(&self) -> Result<usize, DispatcherGone> {
        self.request(|reply| Command::Len { reply }).await
    }

    pub async fn debug_format(&self) -> Result<String, DispatcherGone> {
        self.request(|reply| Command::DebugFormat { reply }).await
    }

    /// Ask the dispatcher task to stop. Pending mailbox entries are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn request<T, F>(&self, build: F) -> Result<T, DispatcherGone>
    where
        F: FnOnce(oneshot::Sender<T>) -> Command<D>,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| DispatcherGone)?;
        response.await.map_err(|_| DispatcherGone)
    }
}
