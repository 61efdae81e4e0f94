//! Shared data types for the hubrelay connection bridge.
//!
//! Everything in this crate is independent of the transport and of the
//! embedding script host: connection status, opaque callback handles,
//! queued events, inbound server calls and async results.

pub mod constants;
pub mod envelope;
pub mod types;

pub use envelope::{AsyncResult, CallArg, Event, ServerMessage, stringify_args};
pub use types::{ConnectionStatus, Handle, UnknownStatus};
