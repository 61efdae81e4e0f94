//! Event bridge between the worker thread and host callbacks.
//!
//! Any thread may [`emit`](EventBridge::emit); only the host thread calls
//! [`process_events`](EventBridge::process_events), which is the sole place
//! host code runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use hubrelay_protocol::{CallArg, Event, Handle};

use crate::error::HostError;
use crate::host::{ScriptHost, invoke_handle};
use crate::queue::ThreadSafeQueue;

/// Which dispatch paths receive each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// The host's legacy slot first, then every registered handle.
    #[default]
    Both,
    /// Registered handles only.
    Registered,
    /// The legacy slot only.
    Legacy,
}

impl DeliveryMode {
    fn includes_legacy(self) -> bool {
        matches!(self, Self::Both | Self::Legacy)
    }

    fn includes_registered(self) -> bool {
        matches!(self, Self::Both | Self::Registered)
    }
}

/// Per-event registry of callback handles plus the pending event queue.
#[derive(Debug, Default)]
pub struct EventBridge {
    callbacks: Mutex<HashMap<String, Vec<Handle>>>,
    queue: ThreadSafeQueue<Event>,
    delivery: Mutex<DeliveryMode>,
}

impl EventBridge {
    pub fn new(delivery: DeliveryMode) -> Self {
        Self {
            callbacks: Mutex::new(HashMap::new()),
            queue: ThreadSafeQueue::new(),
            delivery: Mutex::new(delivery),
        }
    }

    pub fn delivery(&self) -> DeliveryMode {
        *self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_delivery(&self, mode: DeliveryMode) {
        *self.delivery.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    /// Registers `callable` for `event` and returns its handle.
    ///
    /// Handles for one event are invoked in registration order. A handle
    /// that is already registered for `event` is not added twice.
    pub fn on<H: ScriptHost>(
        &self,
        host: &mut H,
        event: &str,
        callable: H::Callable,
    ) -> Result<Handle, HostError> {
        let handle = host.retain(callable)?;
        let mut callbacks = self.callbacks();
        let list = callbacks.entry(event.to_string()).or_default();
        if list.contains(&handle) {
            // `retain` handed back the existing pin; the single `off` or
            // `clear` release still balances it.
            debug!(event, %handle, "handle already registered");
        } else {
            list.push(handle);
        }
        Ok(handle)
    }

    /// Removes `handle` from `event` and releases it.
    ///
    /// Returns `false` if it was not registered.
    pub fn off<H: ScriptHost>(&self, host: &mut H, event: &str, handle: Handle) -> bool {
        let removed = {
            let mut callbacks = self.callbacks();
            let Some(list) = callbacks.get_mut(event) else {
                return false;
            };
            let removed = match list.iter().position(|h| *h == handle) {
                Some(pos) => {
                    list.remove(pos);
                    true
                }
                None => false,
            };
            if list.is_empty() {
                callbacks.remove(event);
            }
            removed
        };

        if removed {
            host.release(handle);
        }
        removed
    }

    /// Releases every handle registered for `event`. Returns how many.
    pub fn off_all<H: ScriptHost>(&self, host: &mut H, event: &str) -> usize {
        let handles = self.callbacks().remove(event).unwrap_or_default();
        for handle in &handles {
            host.release(*handle);
        }
        handles.len()
    }

    /// Queues an event for the next [`process_events`](Self::process_events).
    pub fn emit(&self, event: impl Into<String>, args: Vec<String>) {
        let event = Event::new(event, args);
        trace!(event = %event.name, args = event.args.len(), "event queued");
        self.queue.push(event);
    }

    /// Delivers every event queued before this call.
    ///
    /// Must run on the host thread. Events emitted while callbacks run are
    /// left for the next call. Returns the number of callbacks invoked.
    pub fn process_events<H: ScriptHost>(&self, host: &mut H) -> usize {
        let batch = self.queue.drain();
        if batch.is_empty() {
            return 0;
        }

        let mode = self.delivery();
        let mut invoked = 0;

        for event in batch {
            let args: Vec<CallArg> = event.args.iter().cloned().map(CallArg::Text).collect();

            if mode.includes_legacy()
                && let Some(target) = host.legacy_handler(&event.name)
            {
                invoked += 1;
                if let Err(e) = host.invoke(target, &args) {
                    warn!(event = %event.name, error = %e, "legacy handler failed");
                }
            }

            if mode.includes_registered() {
                invoked += self.dispatch_registered(host, &event.name, &args);
            }
        }

        invoked
    }

    /// Invokes a snapshot of the handles for `event`. The registry lock is
    /// released before any host code runs, so each handle is re-checked.
    fn dispatch_registered<H: ScriptHost>(
        &self,
        host: &mut H,
        event: &str,
        args: &[CallArg],
    ) -> usize {
        let handles = self.callbacks().get(event).cloned().unwrap_or_default();
        let mut invoked = 0;

        for handle in handles {
            if !self.is_registered(event, handle) {
                trace!(event, %handle, "skipping handle removed during dispatch");
                continue;
            }
            match invoke_handle(host, handle, args) {
                Ok(()) => invoked += 1,
                Err(HostError::StaleHandle(_)) => {
                    debug!(event, %handle, "handle no longer redeems");
                }
                Err(e) => {
                    invoked += 1;
                    warn!(event, %handle, error = %e, "event callback failed");
                }
            }
        }

        invoked
    }

    /// Releases every handle and drops undelivered events.
    pub fn clear<H: ScriptHost>(&self, host: &mut H) {
        let callbacks = std::mem::take(&mut *self.callbacks());
        for handle in callbacks.into_values().flatten() {
            host.release(handle);
        }
        self.queue.clear();
    }

    /// Drops undelivered events and forgets every handle without releasing
    /// it. Used when the host is already gone.
    pub(crate) fn forget_all(&self) {
        self.callbacks().clear();
        self.queue.clear();
    }

    pub fn callback_count(&self, event: &str) -> usize {
        self.callbacks().get(event).map_or(0, Vec::len)
    }

    pub fn is_registered(&self, event: &str, handle: Handle) -> bool {
        self.callbacks()
            .get(event)
            .is_some_and(|list| list.contains(&handle))
    }

    /// Number of events waiting for delivery.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn callbacks(&self) -> MutexGuard<'_, HashMap<String, Vec<Handle>>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
