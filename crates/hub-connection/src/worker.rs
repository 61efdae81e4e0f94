//! Background worker running connection episodes.
//!
//! One OS thread drives a current-thread tokio runtime. Each `connect` hands
//! it an episode (target plus cancellation token); episodes run one after
//! another, so a superseded episode has fully unwound before the next one
//! touches the shared state.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hubrelay_protocol::ConnectionStatus;
use hubrelay_protocol::constants::{EVENT_DISCONNECTED, EVENT_ERROR};

use crate::error::TransportError;
use crate::manager::Shared;
use crate::reconnection::{
    Attempt, LiveConnection, WaitOutcome, establish, on_established, reconnect_loop,
    wait_connected,
};
use crate::transport::stop_connection;
use crate::types::ConnectTarget;

const WORKER_THREAD_NAME: &str = "hubrelay-worker";

pub(crate) enum Command {
    Run {
        target: ConnectTarget,
        cancel: CancellationToken,
    },
}

pub(crate) struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    thread: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn(shared: Arc<Shared>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let (commands, rx) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || runtime.block_on(command_loop(shared, rx)))?;
        debug!("connection worker started");
        Ok(Self { commands, thread })
    }

    /// Queues a command. Gives it back if the worker has exited.
    pub(crate) fn submit(&self, command: Command) -> Result<(), Command> {
        self.commands.send(command).map_err(|e| e.0)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Closes the command channel and waits for the thread to exit.
    ///
    /// Cancel the running episode first or this blocks until it ends.
    pub(crate) fn join(self) {
        drop(self.commands);
        if self.thread.join().is_err() {
            warn!("connection worker panicked");
        }
        debug!("connection worker stopped");
    }
}

async fn command_loop(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Run { target, cancel } => {
                if cancel.is_cancelled() {
                    debug!(url = %target.url, "skipping superseded connect request");
                    continue;
                }
                run_episode(&shared, &target, &cancel).await;
            }
        }
    }
}

/// Connects, stays connected, and reconnects per policy until cancelled or
/// out of attempts.
pub(crate) async fn run_episode(
    shared: &Arc<Shared>,
    target: &ConnectTarget,
    cancel: &CancellationToken,
) {
    shared.reconnect_attempts.store(0, Ordering::SeqCst);
    shared.reconnecting.store(false, Ordering::SeqCst);
    shared.set_status(ConnectionStatus::Connecting);
    info!(url = %target.url, "connecting to hub");

    let mut live = match establish(shared, target, cancel).await {
        Attempt::Connected(live) => {
            on_established(shared, false);
            info!(url = %target.url, "connected to hub");
            Some(live)
        }
        Attempt::Failed(e) => {
            warn!(url = %target.url, error = %e, "connection failed");
            shared.set_status(ConnectionStatus::Disconnected);
            shared.emit(EVENT_ERROR, vec![e.to_string()]);
            None
        }
        Attempt::Cancelled => None,
    };

    loop {
        if let Some(mut conn) = live.take() {
            match wait_connected(&mut conn, cancel).await {
                WaitOutcome::StopRequested => {
                    close(shared, conn).await;
                    break;
                }
                WaitOutcome::Dropped(error) => connection_lost(shared, error),
            }
        }

        if cancel.is_cancelled() {
            break;
        }
        match reconnect_loop(shared, target, cancel).await {
            Some(conn) => live = Some(conn),
            None => break,
        }
    }

    shared.set_connection(None);
    shared.set_status(ConnectionStatus::Disconnected);
    debug!("connection episode finished");
}

/// Stops a live connection at the host's request.
async fn close(shared: &Shared, live: LiveConnection) {
    shared.set_status(ConnectionStatus::Disconnecting);
    let LiveConnection { conn, drops } = live;
    // The stop below fires the disconnect handler; nobody needs that notice.
    drop(drops);

    if !stop_connection(conn.as_ref(), shared.stop_timeout).await {
        warn!("connection stop timed out");
    }
    shared.set_connection(None);
    shared.set_status(ConnectionStatus::Disconnected);
    shared.emit(EVENT_DISCONNECTED, Vec::new());
    info!("disconnected from hub");
}

/// Handles a drop the host did not ask for.
fn connection_lost(shared: &Shared, error: Option<TransportError>) {
    shared.set_connection(None);
    shared.set_status(ConnectionStatus::Disconnected);
    match error {
        Some(e) => {
            warn!(error = %e, "connection lost");
            shared.emit(EVENT_ERROR, vec![format!("Disconnected due to an error: {e}")]);
        }
        None => {
            info!("connection closed by server");
            shared.emit(EVENT_DISCONNECTED, Vec::new());
        }
    }
}
