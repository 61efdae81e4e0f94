//! In-memory script host and transport used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use hubrelay_protocol::{CallArg, Handle};

use crate::error::{HostError, TransportError};
use crate::events::EventBridge;
use crate::host::ScriptHost;
use crate::transport::{
    Completion, ConnectionBuilder, DisconnectCallback, Headers, HubConnection, InvokeCallback,
    MethodHandler,
};

// ---------------------------------------------------------------------------
// Script host
// ---------------------------------------------------------------------------

/// A named stand-in for a script function.
#[derive(Debug, Clone)]
pub(crate) struct Callback {
    name: String,
    fails: bool,
}

pub(crate) fn callable(name: &str) -> Option<Callback> {
    Some(Callback {
        name: name.into(),
        fails: false,
    })
}

/// A callback whose invocation raises a script error.
pub(crate) fn failing(name: &str) -> Option<Callback> {
    Some(Callback {
        name: name.into(),
        fails: true,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub(crate) name: String,
    pub(crate) args: Vec<String>,
}

impl Call {
    pub(crate) fn new(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Side effect run by the host right after a named callback is invoked.
#[derive(Debug, Clone)]
pub(crate) enum Hook {
    Emit(String),
    Off(String, Handle),
}

/// Records every call and release. `None` plays the part of a value that
/// is not callable.
#[derive(Default)]
pub(crate) struct RecordingHost {
    next: i64,
    table: HashMap<Handle, Callback>,
    legacy: HashMap<String, Callback>,
    hooks: HashMap<String, Hook>,
    reuse: Option<Handle>,
    calls: Vec<Call>,
    released: Vec<Handle>,
    bridge: Option<Arc<EventBridge>>,
}

impl RecordingHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A host whose hooks act on `bridge`.
    pub(crate) fn with_bridge(bridge: Arc<EventBridge>) -> Self {
        Self {
            bridge: Some(bridge),
            ..Self::default()
        }
    }

    pub(crate) fn hook(&mut self, callback: &str, hook: Hook) {
        self.hooks.insert(callback.into(), hook);
    }

    pub(crate) fn set_legacy(&mut self, event: &str, callback: &str) {
        self.legacy.insert(
            event.into(),
            Callback {
                name: callback.into(),
                fails: false,
            },
        );
    }

    /// Drops a handle behind the bridge's back, as a script collecting it
    /// would.
    pub(crate) fn forget(&mut self, handle: Handle) {
        self.table.remove(&handle);
    }

    /// Makes the next `retain` hand out `handle` again.
    pub(crate) fn reuse_next(&mut self, handle: Handle) {
        self.reuse = Some(handle);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.clone()
    }

    pub(crate) fn calls_to(&self, name: &str) -> Vec<Call> {
        self.calls.iter().filter(|c| c.name == name).cloned().collect()
    }

    pub(crate) fn released(&self) -> Vec<Handle> {
        self.released.clone()
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.table.len()
    }
}

fn render(arg: &CallArg) -> String {
    match arg {
        CallArg::Text(s) => s.clone(),
        CallArg::Bool(b) => b.to_string(),
        CallArg::Json(Value::String(s)) => s.clone(),
        CallArg::Json(v) => v.to_string(),
    }
}

impl ScriptHost for RecordingHost {
    type Callable = Option<Callback>;
    type Invocable = Callback;

    fn retain(&mut self, callable: Self::Callable) -> Result<Handle, HostError> {
        let callback = callable.ok_or(HostError::NotCallable)?;
        let handle = match self.reuse.take() {
            Some(handle) => handle,
            None => {
                self.next += 1;
                Handle::new(self.next)
            }
        };
        self.table.insert(handle, callback);
        Ok(handle)
    }

    fn redeem(&mut self, handle: Handle) -> Option<Self::Invocable> {
        self.table.get(&handle).cloned()
    }

    fn invoke(&mut self, target: Self::Invocable, args: &[CallArg]) -> Result<(), HostError> {
        self.calls.push(Call {
            name: target.name.clone(),
            args: args.iter().map(render).collect(),
        });

        if let Some(hook) = self.hooks.get(&target.name).cloned()
            && let Some(bridge) = self.bridge.clone()
        {
            match hook {
                Hook::Emit(event) => bridge.emit(event, Vec::new()),
                Hook::Off(event, handle) => {
                    bridge.off(self, &event, handle);
                }
            }
        }

        if target.fails {
            return Err(HostError::Script(format!("{} raised", target.name)));
        }
        Ok(())
    }

    fn release(&mut self, handle: Handle) {
        self.table.remove(&handle);
        self.released.push(handle);
    }

    fn legacy_handler(&mut self, event: &str) -> Option<Self::Invocable> {
        self.legacy.get(event).cloned()
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// What a mock connection does when started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartPlan {
    Succeed,
    Fail,
    /// Never completes; the start timeout or a cancel has to end it.
    Hang,
}

/// Hands out scripted [`MockConnection`]s and keeps every one it built.
pub(crate) struct MockBuilder {
    plan: Mutex<VecDeque<StartPlan>>,
    fallback: StartPlan,
    built: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockBuilder {
    /// Every start succeeds.
    pub(crate) fn new() -> Arc<Self> {
        Self::scripted([], StartPlan::Succeed)
    }

    /// Follows `plan`, then `fallback` for every later build.
    pub(crate) fn scripted(
        plan: impl IntoIterator<Item = StartPlan>,
        fallback: StartPlan,
    ) -> Arc<Self> {
        Arc::new(Self {
            plan: Mutex::new(plan.into_iter().collect()),
            fallback,
            built: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn built(&self) -> Vec<Arc<MockConnection>> {
        self.built.lock().unwrap().clone()
    }

    pub(crate) fn build_count(&self) -> usize {
        self.built.lock().unwrap().len()
    }

    pub(crate) fn last(&self) -> Arc<MockConnection> {
        self.built.lock().unwrap().last().cloned().expect("nothing built yet")
    }
}

impl ConnectionBuilder for MockBuilder {
    fn build(
        &self,
        url: &str,
        headers: &Headers,
    ) -> Result<Arc<dyn HubConnection>, TransportError> {
        let plan = self.plan.lock().unwrap().pop_front().unwrap_or(self.fallback);
        let mut built = self.built.lock().unwrap();
        let conn = Arc::new(MockConnection {
            id: format!("mock-{}", built.len() + 1),
            url: url.into(),
            headers: headers.clone(),
            plan,
            handlers: Mutex::new(HashMap::new()),
            disconnected: Mutex::new(None),
            pending_start: Mutex::new(None),
            invocations: Mutex::new(Vec::new()),
            reply: Mutex::new(Ok(Value::Null)),
            stops: AtomicUsize::new(0),
            started: AtomicBool::new(false),
        });
        built.push(conn.clone());
        Ok(conn)
    }
}

pub(crate) struct MockConnection {
    id: String,
    pub(crate) url: String,
    pub(crate) headers: Headers,
    plan: StartPlan,
    handlers: Mutex<HashMap<String, MethodHandler>>,
    disconnected: Mutex<Option<DisconnectCallback>>,
    pending_start: Mutex<Option<Completion>>,
    invocations: Mutex<Vec<(String, Vec<Value>)>>,
    reply: Mutex<Result<Value, TransportError>>,
    stops: AtomicUsize,
    started: AtomicBool,
}

impl MockConnection {
    /// Fires the disconnect handler as the library would on a lost link.
    pub(crate) fn simulate_drop(&self, error: Option<TransportError>) {
        if let Some(handler) = self.disconnected.lock().unwrap().as_ref() {
            handler(error);
        }
    }

    /// Calls the handler installed for `method`. Returns `false` if none is.
    pub(crate) fn simulate_server_call(&self, method: &str, args: Vec<Value>) -> bool {
        match self.handlers.lock().unwrap().get(method) {
            Some(handler) => {
                handler(args);
                true
            }
            None => false,
        }
    }

    pub(crate) fn has_handler(&self, method: &str) -> bool {
        self.handlers.lock().unwrap().contains_key(method)
    }

    pub(crate) fn set_reply(&self, reply: Result<Value, TransportError>) {
        *self.reply.lock().unwrap() = reply;
    }

    pub(crate) fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.invocations.lock().unwrap().clone()
    }

    pub(crate) fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn was_stopped(&self) -> bool {
        self.stops.load(Ordering::SeqCst) > 0
    }
}

impl HubConnection for MockConnection {
    fn start(&self, done: Completion) {
        self.started.store(true, Ordering::SeqCst);
        match self.plan {
            StartPlan::Succeed => done(Ok(())),
            StartPlan::Fail => done(Err(TransportError::Start("connection refused".into()))),
            // Holding the completion keeps the waiter's channel open.
            StartPlan::Hang => *self.pending_start.lock().unwrap() = Some(done),
        }
    }

    fn stop(&self, done: Completion) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.pending_start.lock().unwrap().take();
        // The real library reports its own stop as a clean disconnect.
        self.simulate_drop(None);
        done(Ok(()));
    }

    fn invoke(&self, method: &str, args: Vec<Value>, done: InvokeCallback) {
        self.invocations
            .lock()
            .unwrap()
            .push((method.to_string(), args));
        let reply = self.reply.lock().unwrap().clone();
        done(reply);
    }

    fn on(&self, method: &str, handler: MethodHandler) {
        self.handlers
            .lock()
            .unwrap()
            .insert(method.to_string(), handler);
    }

    fn set_disconnected(&self, handler: DisconnectCallback) {
        *self.disconnected.lock().unwrap() = Some(handler);
    }

    fn connection_id(&self) -> String {
        self.id.clone()
    }
}

/// Polls `cond` every few milliseconds until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
