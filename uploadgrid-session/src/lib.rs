use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info};
use uploadgrid_core::{
    BatchSummary, CoreError, FinalizedItem, IntakeReport, ItemView, LocalId, PreviewProvider,
    RawFile, SessionConfig, SessionPhase, Transport, TransportEvent, UploadSession,
};

pub mod config;
pub mod sim;

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session task has stopped")]
    Closed,
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Everything the UI needs to render one frame of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub items: Vec<ItemView>,
    pub can_create: bool,
    pub phase: SessionPhase,
    pub last_error: Option<String>,
    pub last_batch: Option<BatchSummary>,
}

impl SessionView {
    fn of<T: Transport, P: PreviewProvider>(session: &UploadSession<T, P>) -> Self {
        Self {
            items: session.snapshot(),
            can_create: session.can_create(),
            phase: session.phase(),
            last_error: session.last_error().map(str::to_owned),
            last_batch: session.last_batch(),
        }
    }

    /// True once no item is waiting on the transport or a retry slot.
    pub fn is_settled(&self) -> bool {
        self.items.iter().all(|item| !item.status.is_in_flight())
    }
}

#[derive(Debug)]
enum Command {
    AddFiles {
        files: Vec<RawFile>,
        reply: oneshot::Sender<IntakeReport>,
    },
    Reorder {
        source: usize,
        destination: Option<usize>,
        reply: oneshot::Sender<Result<bool, CoreError>>,
    },
    Retry {
        local_id: LocalId,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    RetryAll {
        reply: oneshot::Sender<usize>,
    },
    Remove {
        local_id: LocalId,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    SetMetadata {
        local_id: LocalId,
        key: String,
        value: String,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    Finalize {
        reply: oneshot::Sender<Result<Vec<FinalizedItem>, CoreError>>,
    },
    Shutdown,
}

/// Cloneable front door to a running session task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    pub async fn add_files(&self, files: Vec<RawFile>) -> Result<IntakeReport, SessionError> {
        self.request(|reply| Command::AddFiles { files, reply }).await
    }

    pub async fn reorder(
        &self,
        source: usize,
        destination: Option<usize>,
    ) -> Result<bool, SessionError> {
        Ok(self
            .request(|reply| Command::Reorder {
                source,
                destination,
                reply,
            })
            .await??)
    }

    pub async fn retry(&self, local_id: LocalId) -> Result<(), SessionError> {
        Ok(self
            .request(|reply| Command::Retry { local_id, reply })
            .await??)
    }

    pub async fn retry_all(&self) -> Result<usize, SessionError> {
        self.request(|reply| Command::RetryAll { reply }).await
    }

    pub async fn remove_item(&self, local_id: LocalId) -> Result<(), SessionError> {
        Ok(self
            .request(|reply| Command::Remove { local_id, reply })
            .await??)
    }

    pub async fn set_item_metadata(
        &self,
        local_id: LocalId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), SessionError> {
        let (key, value) = (key.into(), value.into());
        Ok(self
            .request(|reply| Command::SetMetadata {
                local_id,
                key,
                value,
                reply,
            })
            .await??)
    }

    pub async fn finalize(&self) -> Result<Vec<FinalizedItem>, SessionError> {
        Ok(self.request(|reply| Command::Finalize { reply }).await??)
    }

    /// Latest published view.
    pub fn snapshot(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn can_create(&self) -> bool {
        self.view.borrow().can_create
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Resolves with the first published view matching `predicate`.
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&SessionView) -> bool,
    ) -> Result<SessionView, SessionError> {
        let mut view = self.view.clone();
        let matched = view
            .wait_for(|current| predicate(current))
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(matched.clone())
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Starts a session task. `make_transport` receives the sender its events must be delivered on;
/// the resulting transport is owned (and dropped) by the session.
pub fn spawn_session<T, P, F>(
    config: SessionConfig,
    make_transport: F,
    previews: P,
) -> (SessionHandle, JoinHandle<()>)
where
    T: Transport + Send + 'static,
    P: PreviewProvider + Send + 'static,
    F: FnOnce(EventSender) -> T,
{
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let session = UploadSession::new(config, make_transport(event_tx), previews);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(SessionView::of(&session));

    let task = tokio::spawn(run_session(session, command_rx, event_rx, view_tx));
    (
        SessionHandle {
            commands: command_tx,
            view: view_rx,
        },
        task,
    )
}

async fn run_session<T: Transport, P: PreviewProvider>(
    mut session: UploadSession<T, P>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    view_tx: watch::Sender<SessionView>,
) {
    info!(
        min_display_ms = session.config().min_display_ms,
        retry_stagger_ms = session.config().retry_stagger_ms,
        "session started"
    );

    loop {
        let deadline = session.next_deadline();
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => handle_command(&mut session, command, &view_tx),
                }
            }
            Some(event) = events.recv() => {
                session.handle_transport_event(event, Instant::now());
                publish(&session, &view_tx);
            }
            _ = sleep_until(deadline) => {
                session.poll_timers(Instant::now());
                publish(&session, &view_tx);
            }
        }
    }

    session.close();
    publish(&session, &view_tx);
    info!("session stopped");
}

fn handle_command<T: Transport, P: PreviewProvider>(
    session: &mut UploadSession<T, P>,
    command: Command,
    view_tx: &watch::Sender<SessionView>,
) {
    let now = Instant::now();
    match command {
        Command::AddFiles { files, reply } => {
            let report = session.add_files(files);
            respond(session, view_tx, reply, report);
        }
        Command::Reorder {
            source,
            destination,
            reply,
        } => {
            let result = session.reorder(source, destination);
            respond(session, view_tx, reply, result);
        }
        Command::Retry { local_id, reply } => {
            let result = session.retry(local_id, now);
            respond(session, view_tx, reply, result);
        }
        Command::RetryAll { reply } => {
            let count = session.retry_all(now);
            respond(session, view_tx, reply, count);
        }
        Command::Remove { local_id, reply } => {
            let result = session.remove_item(local_id);
            respond(session, view_tx, reply, result);
        }
        Command::SetMetadata {
            local_id,
            key,
            value,
            reply,
        } => {
            let result = session.set_item_metadata(local_id, key, value);
            respond(session, view_tx, reply, result);
        }
        Command::Finalize { reply } => {
            let result = session.finalize();
            respond(session, view_tx, reply, result);
        }
        Command::Shutdown => {}
    }
}

/// Publishes before replying so a caller that awaited the reply already sees the new view.
fn respond<T: Transport, P: PreviewProvider, R>(
    session: &UploadSession<T, P>,
    view_tx: &watch::Sender<SessionView>,
    reply: oneshot::Sender<R>,
    value: R,
) {
    publish(session, view_tx);
    if reply.send(value).is_err() {
        debug!("requester went away before reply");
    }
}

fn publish<T: Transport, P: PreviewProvider>(
    session: &UploadSession<T, P>,
    view_tx: &watch::Sender<SessionView>,
) {
    view_tx.send_replace(SessionView::of(session));
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}
