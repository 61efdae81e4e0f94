//! Interface to the underlying hub-connection library.
//!
//! The library owns sockets, framing and the handshake. It reports every
//! outcome through callbacks that may fire on its own network threads; this
//! crate adds the timeouts, retries and thread marshalling around them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::TransportError;

/// Completion for `start` and `stop`.
pub type Completion = Box<dyn FnOnce(Result<(), TransportError>) + Send>;

/// Completion for `invoke`, carrying the server's return value.
pub type InvokeCallback = Box<dyn FnOnce(Result<Value, TransportError>) + Send>;

/// Handler for an inbound server-invoked method.
pub type MethodHandler = Box<dyn Fn(Vec<Value>) + Send + Sync>;

/// Disconnect notification. `None` means the connection closed cleanly.
pub type DisconnectCallback = Box<dyn Fn(Option<TransportError>) + Send + Sync>;

/// HTTP headers sent with the connection handshake.
pub type Headers = BTreeMap<String, String>;

/// One hub connection object. Built fresh for every connect or reconnect
/// attempt and never restarted.
pub trait HubConnection: Send + Sync {
    fn start(&self, done: Completion);

    fn stop(&self, done: Completion);

    fn invoke(&self, method: &str, args: Vec<Value>, done: InvokeCallback);

    /// Routes inbound calls of `method` to `handler`. Only honoured before
    /// [`start`](Self::start).
    fn on(&self, method: &str, handler: MethodHandler);

    fn set_disconnected(&self, handler: DisconnectCallback);

    /// Server-assigned connection id, empty if unknown.
    fn connection_id(&self) -> String;
}

/// Factory for [`HubConnection`]s.
pub trait ConnectionBuilder: Send + Sync {
    fn build(&self, url: &str, headers: &Headers)
    -> Result<Arc<dyn HubConnection>, TransportError>;
}

/// Starts `conn` and waits at most `timeout` for its completion.
pub(crate) async fn start_connection(
    conn: &dyn HubConnection,
    timeout: Duration,
) -> Result<(), TransportError> {
    let (tx, rx) = oneshot::channel();
    conn.start(Box::new(move |result| {
        let _ = tx.send(result);
    }));

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(TransportError::Start("start completion dropped".into())),
        Err(_) => Err(TransportError::Timeout),
    }
}

/// Stops `conn`, waiting at most `timeout`. Returns `false` on timeout.
pub(crate) async fn stop_connection(conn: &dyn HubConnection, timeout: Duration) -> bool {
    let (tx, rx) = oneshot::channel();
    conn.stop(Box::new(move |result| {
        let _ = tx.send(result);
    }));

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(Err(e))) => {
            tracing::debug!(error = %e, "connection stop reported an error");
            true
        }
        Ok(_) => true,
        Err(_) => false,
    }
}
