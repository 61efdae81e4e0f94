//! Connection establishment and the reconnect loop with exponential backoff.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use hubrelay_protocol::constants::{
    EVENT_CONNECTED, EVENT_ERROR, EVENT_RECONNECTED, EVENT_RECONNECTING, GIVE_UP_MESSAGE,
};
use hubrelay_protocol::{ConnectionStatus, ServerMessage};

use crate::error::TransportError;
use crate::manager::Shared;
use crate::transport::{HubConnection, start_connection, stop_connection};
use crate::types::ConnectTarget;

/// A started connection plus the channel its disconnect handler reports on.
pub(crate) struct LiveConnection {
    pub(crate) conn: Arc<dyn HubConnection>,
    pub(crate) drops: mpsc::UnboundedReceiver<Option<TransportError>>,
}

/// Outcome of one build-and-start attempt.
pub(crate) enum Attempt {
    Connected(LiveConnection),
    Failed(TransportError),
    Cancelled,
}

/// How a connected wait ended.
pub(crate) enum WaitOutcome {
    StopRequested,
    Dropped(Option<TransportError>),
}

/// Builds a fresh connection object, wires its handlers and starts it.
///
/// Server methods are snapshotted here, so registrations made later apply
/// from the next attempt. On success the connection is stored in the shared
/// slot before returning.
pub(crate) async fn establish(
    shared: &Arc<Shared>,
    target: &ConnectTarget,
    cancel: &CancellationToken,
) -> Attempt {
    let conn = match shared.builder.build(&target.url, &target.headers()) {
        Ok(conn) => conn,
        Err(e) => return Attempt::Failed(e),
    };

    // Each connection object gets its own channel; once the episode stops
    // listening, late notifications from old objects go nowhere.
    let (drop_tx, drops) = mpsc::unbounded_channel();
    conn.set_disconnected(Box::new(move |error| {
        let _ = drop_tx.send(error);
    }));

    register_server_methods(shared, conn.as_ref());

    let started = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = start_connection(conn.as_ref(), shared.start_timeout) => Some(result),
    };

    match started {
        None => {
            debug!("start cancelled");
            if !stop_connection(conn.as_ref(), shared.stop_timeout).await {
                warn!("stopping cancelled connection timed out");
            }
            Attempt::Cancelled
        }
        Some(Err(e)) => Attempt::Failed(e),
        Some(Ok(())) => {
            shared.set_connection(Some(conn.clone()));
            Attempt::Connected(LiveConnection { conn, drops })
        }
    }
}

fn register_server_methods(shared: &Arc<Shared>, conn: &dyn HubConnection) {
    for method in shared.server_methods.snapshot() {
        let weak = Arc::downgrade(shared);
        let name = method.clone();
        conn.on(
            &method,
            Box::new(move |args| {
                if let Some(shared) = weak.upgrade() {
                    shared.enqueue_server_call(ServerMessage::new(name.clone(), args));
                }
            }),
        );
        trace!(method = %method, "server method handler installed");
    }
}

/// Records a successful (re)connect.
pub(crate) fn on_established(shared: &Shared, reconnected: bool) {
    shared.set_status(ConnectionStatus::Connected);
    shared.reconnect_attempts.store(0, Ordering::SeqCst);
    shared.reconnecting.store(false, Ordering::SeqCst);
    let event = if reconnected {
        EVENT_RECONNECTED
    } else {
        EVENT_CONNECTED
    };
    shared.emit(event, Vec::new());
}

/// Parks the worker until a stop is requested or the connection drops.
pub(crate) async fn wait_connected(
    live: &mut LiveConnection,
    cancel: &CancellationToken,
) -> WaitOutcome {
    tokio::select! {
        _ = cancel.cancelled() => WaitOutcome::StopRequested,
        notice = live.drops.recv() => match notice {
            Some(error) => WaitOutcome::Dropped(error),
            None => WaitOutcome::Dropped(Some(TransportError::Closed(
                "disconnect handler dropped".into(),
            ))),
        },
    }
}

/// Retries the connection until it succeeds, the policy says stop, or the
/// episode is cancelled.
///
/// Only one loop runs at a time; a second caller returns `None` straight
/// away.
pub(crate) async fn reconnect_loop(
    shared: &Arc<Shared>,
    target: &ConnectTarget,
    cancel: &CancellationToken,
) -> Option<LiveConnection> {
    if shared.reconnecting.swap(true, Ordering::SeqCst) {
        debug!("reconnect loop already running");
        return None;
    }
    let result = retry(shared, target, cancel).await;
    shared.reconnecting.store(false, Ordering::SeqCst);
    result
}

async fn retry(
    shared: &Arc<Shared>,
    target: &ConnectTarget,
    cancel: &CancellationToken,
) -> Option<LiveConnection> {
    while !cancel.is_cancelled() {
        // Re-read every iteration so policy changes take effect mid-loop.
        let policy = shared.reconnect_policy();
        if !policy.enabled {
            debug!("reconnect disabled");
            return None;
        }

        let attempt = shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if policy.exhausted(attempt) {
            warn!(max_attempts = policy.max_attempts, "giving up on reconnecting");
            shared.set_status(ConnectionStatus::Disconnected);
            shared.emit(EVENT_ERROR, vec![GIVE_UP_MESSAGE.to_string()]);
            return None;
        }

        let delay = policy.delay_for_attempt(attempt);
        shared.set_status(ConnectionStatus::Reconnecting);
        shared.emit(EVENT_RECONNECTING, vec![attempt.to_string()]);
        info!(
            attempt,
            delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
            "reconnecting"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reconnect cancelled");
                return None;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match establish(shared, target, cancel).await {
            Attempt::Connected(live) => {
                on_established(shared, true);
                info!(attempt, "reconnected");
                return Some(live);
            }
            Attempt::Failed(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            Attempt::Cancelled => return None,
        }
    }
    None
}
