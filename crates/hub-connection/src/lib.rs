//! Hub connection manager for single-threaded script hosts.
//!
//! Keeps one connection to a hub alive, reconnects with exponential backoff,
//! and marshals everything that happens on background threads into queues
//! the host drains with [`ConnectionManager::poll`].

pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod logging;
pub mod manager;
pub mod queue;
pub(crate) mod reconnection;
pub mod server_methods;
pub mod transport;
pub mod types;
pub(crate) mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::ClientConfig;
pub use error::{ConfigError, ConnectError, HostError, LoggingError, SendError, TransportError};
pub use events::{DeliveryMode, EventBridge};
pub use host::ScriptHost;
pub use logging::LogLevel;
pub use manager::ConnectionManager;
pub use queue::ThreadSafeQueue;
pub use server_methods::ServerMethodRegistry;
pub use transport::{ConnectionBuilder, HubConnection};
pub use types::{ConnectTarget, ReconnectConfig};

/// Library version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
