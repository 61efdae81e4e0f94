//! Capability interface to the embedding script host.
//!
//! The bridge never touches host callables directly. It asks the host to
//! turn a callable into a durable [`Handle`], stores that handle, and on the
//! host thread asks for it back when an event is delivered. Implementations
//! are owned by the host thread and are only ever borrowed by the drain
//! operations, so they need not be `Send`.

use hubrelay_protocol::{CallArg, Handle};

use crate::error::HostError;

pub trait ScriptHost {
    /// Value the host offers for registration (e.g. a function on the
    /// script stack).
    type Callable;

    /// A callable resolved from a handle, ready to run.
    type Invocable;

    /// Pins `callable` and returns a durable handle for it.
    ///
    /// Fails with [`HostError::NotCallable`] if the value cannot be called.
    ///
    /// Retaining a callable that already has a live handle must return that
    /// handle without pinning it a second time. Each handle is released
    /// exactly once.
    fn retain(&mut self, callable: Self::Callable) -> Result<Handle, HostError>;

    /// Resolves a handle. `None` if it no longer refers to a callable.
    fn redeem(&mut self, handle: Handle) -> Option<Self::Invocable>;

    /// Runs a callable with positional arguments. Script errors are
    /// returned, never raised through the bridge.
    fn invoke(&mut self, target: Self::Invocable, args: &[CallArg]) -> Result<(), HostError>;

    /// Unpins a handle. Called exactly once per retained handle.
    fn release(&mut self, handle: Handle);

    /// Looks up the conventional single-slot handler for `event`.
    ///
    /// Looked up fresh on every delivery; hosts without such a slot keep the
    /// default.
    fn legacy_handler(&mut self, _event: &str) -> Option<Self::Invocable> {
        None
    }
}

/// Redeems and invokes `handle`.
///
/// A handle that no longer redeems is reported as
/// [`HostError::StaleHandle`].
pub fn invoke_handle<H: ScriptHost>(
    host: &mut H,
    handle: Handle,
    args: &[CallArg],
) -> Result<(), HostError> {
    let target = host.redeem(handle).ok_or(HostError::StaleHandle(handle))?;
    host.invoke(target, args)
}
