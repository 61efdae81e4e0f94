//! Error types for the connection bridge.

/// Errors returned synchronously by [`connect`](crate::ConnectionManager::connect).
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid URL scheme: '{0}'")]
    InvalidScheme(String),

    #[error("already connected")]
    AlreadyConnected,

    #[error("failed to start connection worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors returned synchronously by the send operations.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
}

/// Errors reported by the transport collaborator.
///
/// These never reach the host directly; they become `error` events or
/// failed async results.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to build connection: {0}")]
    Build(String),

    #[error("failed to start connection: {0}")]
    Start(String),

    #[error("connection timeout")]
    Timeout,

    #[error("invoke failed: {0}")]
    Invoke(String),

    #[error("connection closed: {0}")]
    Closed(String),
}

/// Errors reported by the script host collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("argument is not callable")]
    NotCallable,

    #[error("handle {0} is no longer valid")]
    StaleHandle(hubrelay_protocol::Handle),

    #[error("script error: {0}")]
    Script(String),
}

/// Errors loading a [`ClientConfig`](crate::config::ClientConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Errors installing the log subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(String),

    #[error("failed to update log filter: {0}")]
    Reload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            ConnectError::InvalidScheme("ftp".into()).to_string(),
            "invalid URL scheme: 'ftp'"
        );
        assert_eq!(ConnectError::AlreadyConnected.to_string(), "already connected");
        assert_eq!(SendError::NotConnected.to_string(), "not connected");
        assert_eq!(TransportError::Timeout.to_string(), "connection timeout");
        assert_eq!(
            HostError::StaleHandle(hubrelay_protocol::Handle::new(7)).to_string(),
            "handle #7 is no longer valid"
        );
    }
}
