//! Connection manager owning the hub connection lifecycle.
//!
//! Every blocking step (start, stop, backoff sleeps) runs on one background
//! worker; the host-facing methods here only flip shared state, hand work to
//! the worker and drain queues. Host callbacks run exclusively inside
//! [`poll`](ConnectionManager::poll).

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use hubrelay_protocol::constants::is_internal_event;
use hubrelay_protocol::{AsyncResult, ConnectionStatus, Handle, ServerMessage};

use crate::config::ClientConfig;
use crate::error::{ConnectError, HostError, SendError};
use crate::events::{DeliveryMode, EventBridge};
use crate::host::{ScriptHost, invoke_handle};
use crate::queue::ThreadSafeQueue;
use crate::server_methods::ServerMethodRegistry;
use crate::transport::{ConnectionBuilder, HubConnection};
use crate::types::{ConnectTarget, ReconnectConfig};
use crate::worker::{Command, Worker};

/// State shared between the host-facing manager, the worker and transport
/// callbacks.
///
/// The live connection, the reconnect policy and the callback registry each
/// sit behind their own lock and none is taken while holding another.
pub(crate) struct Shared {
    status: AtomicU8,
    reconnect: Mutex<ReconnectConfig>,
    pub(crate) reconnect_attempts: AtomicU32,
    pub(crate) reconnecting: AtomicBool,
    pub(crate) destroyed: AtomicBool,
    connection: Mutex<Option<Arc<dyn HubConnection>>>,
    pub(crate) server_methods: ServerMethodRegistry,
    pub(crate) events: EventBridge,
    messages: ThreadSafeQueue<String>,
    server_calls: ThreadSafeQueue<ServerMessage>,
    results: ThreadSafeQueue<AsyncResult>,
    mirror_messages: AtomicBool,
    pub(crate) builder: Arc<dyn ConnectionBuilder>,
    pub(crate) start_timeout: Duration,
    pub(crate) stop_timeout: Duration,
}

impl Shared {
    pub(crate) fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        let prev = ConnectionStatus::from_u8(self.status.swap(status as u8, Ordering::SeqCst));
        if prev != status {
            debug!(from = %prev, to = %status, "connection status changed");
        }
    }

    fn compare_status(&self, current: ConnectionStatus, new: ConnectionStatus) -> bool {
        self.status
            .compare_exchange(current as u8, new as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn reconnect_policy(&self) -> ReconnectConfig {
        self.reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn connection(&self) -> Option<Arc<dyn HubConnection>> {
        self.connection_slot().clone()
    }

    pub(crate) fn set_connection(&self, conn: Option<Arc<dyn HubConnection>>) {
        *self.connection_slot() = conn;
    }

    fn connection_slot(&self) -> MutexGuard<'_, Option<Arc<dyn HubConnection>>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Queues a lifecycle event for the host.
    pub(crate) fn emit(&self, event: &str, args: Vec<String>) {
        if self.is_destroyed() {
            return;
        }
        self.events.emit(event, args);
    }

    /// Called from the transport's network thread for each inbound call of a
    /// registered server method.
    pub(crate) fn enqueue_server_call(&self, msg: ServerMessage) {
        if self.is_destroyed() {
            return;
        }
        trace!(method = %msg.method, args = msg.args.len(), "server call queued");
        if self.mirror_messages.load(Ordering::Relaxed) {
            match msg.to_json_line() {
                Ok(line) => self.messages.push(line),
                Err(e) => warn!(method = %msg.method, error = %e, "failed to mirror server call"),
            }
        }
        self.server_calls.push(msg);
    }
}

/// Maintains a single hub connection for a single-threaded host.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    /// Cancels the current episode.
    episode: Mutex<Option<CancellationToken>>,
}

impl ConnectionManager {
    /// Creates a manager with default settings.
    pub fn new(builder: Arc<dyn ConnectionBuilder>) -> Self {
        Self::with_config(builder, &ClientConfig::default())
    }

    /// Creates a manager configured from `config`.
    ///
    /// `log_level` is not applied here since the subscriber is process
    /// global. Pass [`ClientConfig::log_level`] to
    /// [`logging::init`](crate::logging::init) instead.
    pub fn with_config(builder: Arc<dyn ConnectionBuilder>, config: &ClientConfig) -> Self {
        let shared = Shared {
            status: AtomicU8::new(ConnectionStatus::Disconnected as u8),
            reconnect: Mutex::new(config.reconnect_config()),
            reconnect_attempts: AtomicU32::new(0),
            reconnecting: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            connection: Mutex::new(None),
            server_methods: ServerMethodRegistry::new(),
            events: EventBridge::new(config.delivery),
            messages: ThreadSafeQueue::new(),
            server_calls: ThreadSafeQueue::new(),
            results: ThreadSafeQueue::new(),
            mirror_messages: AtomicBool::new(config.mirror_messages),
            builder,
            start_timeout: config.start_timeout(),
            stop_timeout: config.stop_timeout(),
        };

        Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
            episode: Mutex::new(None),
        }
    }

    /// Starts connecting to `url` in the background.
    ///
    /// A URL without a scheme gets `https://`. Any attempt still in progress
    /// is told to stop first; the new episode begins once it has unwound.
    /// Progress is reported through [`status`](Self::status) and the
    /// lifecycle events.
    pub fn connect(&self, url: &str, token: Option<&str>) -> Result<(), ConnectError> {
        let target = ConnectTarget::new(url, token).inspect_err(|e| {
            error!(url, error = %e, "rejected connect request");
        })?;

        if self.status() == ConnectionStatus::Connected {
            error!("already connected");
            return Err(ConnectError::AlreadyConnected);
        }

        let cancel = CancellationToken::new();
        if let Some(prev) = self.episode_slot().replace(cancel.clone())
            && !prev.is_cancelled()
        {
            info!("stopping current connection attempt");
            prev.cancel();
        }

        self.shared.destroyed.store(false, Ordering::SeqCst);
        self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
        self.shared.reconnecting.store(false, Ordering::SeqCst);

        info!(url = %target.url, authorized = target.token.is_some(), "connection requested");
        self.submit(Command::Run { target, cancel })?;
        Ok(())
    }

    /// Hands a command to the worker, starting it if needed.
    fn submit(&self, command: Command) -> Result<(), ConnectError> {
        let mut worker = self.worker_slot();
        if worker.as_ref().is_some_and(Worker::is_finished)
            && let Some(dead) = worker.take()
        {
            dead.join();
        }
        if worker.is_none() {
            *worker = Some(Worker::spawn(self.shared.clone())?);
        }

        let command = match worker.as_ref().map(|w| w.submit(command)) {
            Some(Ok(())) => return Ok(()),
            Some(Err(command)) => command,
            None => return Ok(()),
        };

        // The worker exited between the check and the send.
        warn!("connection worker gone, restarting");
        if let Some(dead) = worker.take() {
            dead.join();
        }
        let fresh = Worker::spawn(self.shared.clone())?;
        if fresh.submit(command).is_err() {
            error!("failed to hand connect request to the worker");
        }
        *worker = Some(fresh);
        Ok(())
    }

    /// Asks the worker to stop. Returns immediately; completion shows up as
    /// status `Disconnected` and a `disconnected` event.
    pub fn disconnect(&self) {
        if let Some(cancel) = self.episode_slot().as_ref() {
            cancel.cancel();
        }
        if self.status() == ConnectionStatus::Disconnected {
            return;
        }
        self.shared
            .compare_status(ConnectionStatus::Connected, ConnectionStatus::Disconnecting);
        info!("disconnect requested");
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Server-assigned id of the live connection, empty unless connected.
    pub fn connection_id(&self) -> String {
        if self.status() != ConnectionStatus::Connected {
            return String::new();
        }
        self.shared
            .connection()
            .map(|c| c.connection_id())
            .unwrap_or_default()
    }

    /// Replaces the reconnect policy. A running reconnect loop picks it up
    /// on its next iteration.
    pub fn set_reconnect_policy(&self, config: ReconnectConfig) {
        debug!(?config, "reconnect policy updated");
        *self
            .shared
            .reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn reconnect_policy(&self) -> ReconnectConfig {
        self.shared.reconnect_policy()
    }

    /// Reconnect attempts made since the last successful connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Invokes `method` on the server without waiting for a result.
    ///
    /// A failure reported later by the transport is only logged.
    pub fn send(&self, method: &str, args: Vec<Value>) -> Result<(), SendError> {
        let conn = self.live_connection()?;
        let name = method.to_string();
        conn.invoke(
            method,
            args,
            Box::new(move |result| {
                if let Err(e) = result {
                    warn!(method = %name, error = %e, "send failed");
                }
            }),
        );
        Ok(())
    }

    /// Invokes `method` and delivers the outcome to `handle` during a later
    /// [`poll`](Self::poll).
    ///
    /// On `Ok` the manager owns `handle` and releases it after delivery. On
    /// `Err` it stays with the caller.
    pub fn send_async(
        &self,
        method: &str,
        args: Vec<Value>,
        handle: Handle,
    ) -> Result<(), SendError> {
        let conn = self.live_connection()?;
        let shared = Arc::downgrade(&self.shared);
        let name = method.to_string();
        conn.invoke(
            method,
            args,
            Box::new(move |result| {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                if shared.is_destroyed() {
                    return;
                }
                let result = match result {
                    Ok(value) => AsyncResult::success(handle, value),
                    Err(e) => {
                        warn!(method = %name, error = %e, "async send failed");
                        AsyncResult::failure(handle, e.to_string())
                    }
                };
                shared.results.push(result);
            }),
        );
        Ok(())
    }

    fn live_connection(&self) -> Result<Arc<dyn HubConnection>, SendError> {
        if self.status() != ConnectionStatus::Connected {
            return Err(SendError::NotConnected);
        }
        self.shared.connection().ok_or(SendError::NotConnected)
    }

    /// Routes inbound calls of `method` to the host from the next
    /// (re)connect on.
    pub fn register_server_method(&self, method: &str) -> bool {
        self.shared.server_methods.register(method)
    }

    pub fn unregister_server_method(&self, method: &str) -> bool {
        self.shared.server_methods.unregister(method)
    }

    /// Registers `callable` for `event`.
    ///
    /// Names other than the lifecycle events are also subscribed as server
    /// methods.
    pub fn on<H: ScriptHost>(
        &self,
        host: &mut H,
        event: &str,
        callable: H::Callable,
    ) -> Result<Handle, HostError> {
        let handle = self.shared.events.on(host, event, callable)?;
        if !is_internal_event(event) && self.shared.server_methods.register(event) {
            debug!(method = event, "server method subscribed");
        }
        Ok(handle)
    }

    pub fn off<H: ScriptHost>(&self, host: &mut H, event: &str, handle: Handle) -> bool {
        self.shared.events.off(host, event, handle)
    }

    pub fn off_all<H: ScriptHost>(&self, host: &mut H, event: &str) -> usize {
        self.shared.events.off_all(host, event)
    }

    pub fn callback_count(&self, event: &str) -> usize {
        self.shared.events.callback_count(event)
    }

    pub fn set_delivery(&self, mode: DeliveryMode) {
        self.shared.events.set_delivery(mode);
    }

    /// Pops the oldest mirrored inbound message, if any.
    pub fn get_message(&self) -> Option<String> {
        self.shared.messages.try_pop()
    }

    /// Mirrored inbound messages waiting in the pull queue.
    pub fn queue_size(&self) -> usize {
        self.shared.messages.len()
    }

    pub fn set_mirror_messages(&self, enabled: bool) {
        self.shared.mirror_messages.store(enabled, Ordering::Relaxed);
    }

    /// Delivers everything queued by the worker and the transport.
    ///
    /// Must be called from the host thread. Converts inbound server calls
    /// into events, runs event callbacks, then completes async sends.
    /// Returns the number of deliveries.
    pub fn poll<H: ScriptHost>(&self, host: &mut H) -> usize {
        if self.shared.is_destroyed() {
            return 0;
        }

        let events = &self.shared.events;
        let mut delivered = events.process_events(host);

        for msg in self.shared.server_calls.drain() {
            let event = msg.into_event();
            events.emit(event.name, event.args);
            delivered += 1;
        }

        delivered += events.process_events(host);

        for result in self.shared.results.drain() {
            let handle = result.handle;
            match invoke_handle(host, handle, &result.into_call_args()) {
                Ok(()) => delivered += 1,
                Err(HostError::StaleHandle(_)) => {
                    warn!(%handle, "async callback handle is not callable");
                }
                Err(e) => {
                    delivered += 1;
                    warn!(%handle, error = %e, "async callback failed");
                }
            }
            host.release(handle);
        }

        delivered
    }

    /// Tears everything down: stops the connection, joins the worker,
    /// releases every handle held for `host` and empties all queues.
    ///
    /// Safe to call more than once. A later [`connect`](Self::connect)
    /// starts afresh.
    pub fn shutdown<H: ScriptHost>(&self, host: &mut H) {
        self.stop_worker();
        self.shared.events.clear(host);
        for result in self.shared.results.drain() {
            host.release(result.handle);
        }
        self.shared.server_calls.clear();
        self.shared.messages.clear();
        self.shared.set_status(ConnectionStatus::Disconnected);
        info!("connection manager shut down");
    }

    /// Marks the manager destroyed, cancels the episode and joins the
    /// worker. The worker stops any live connection with a bounded wait.
    fn stop_worker(&self) {
        self.shared.destroyed.store(true, Ordering::SeqCst);
        if let Some(cancel) = self.episode_slot().take() {
            cancel.cancel();
        }
        let worker = self.worker_slot().take();
        if let Some(worker) = worker {
            worker.join();
        }
        self.shared.set_connection(None);
    }

    fn episode_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.episode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn pending_results(&self) -> usize {
        self.shared.results.len()
    }

    #[cfg(test)]
    pub(crate) fn pending_server_calls(&self) -> usize {
        self.shared.server_calls.len()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // No host to release handles into; they die with it.
        self.stop_worker();
        self.shared.events.forget_all();
        self.shared.results.clear();
        self.shared.server_calls.clear();
        self.shared.messages.clear();
        self.shared.set_status(ConnectionStatus::Disconnected);
    }
}
