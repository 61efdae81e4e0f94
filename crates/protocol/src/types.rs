use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Current phase of the hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionStatus {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected = 0,
    /// Building and starting the underlying connection.
    Connecting = 1,
    /// Started and usable for sends.
    Connected = 2,
    /// A requested stop is being carried out.
    Disconnecting = 3,
    /// Connection lost, waiting on the backoff delay or retrying.
    Reconnecting = 4,
}

impl ConnectionStatus {
    /// Lowercase name as shown to the host.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Decodes the value stored in an atomic. Unknown values read as
    /// `Disconnected`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnecting,
            4 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a status name fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown connection status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for ConnectionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "disconnecting" => Ok(Self::Disconnecting),
            "reconnecting" => Ok(Self::Reconnecting),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Opaque reference to a host-side callable.
///
/// Minted and redeemed by the script host; the bridge only stores and
/// compares handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(i64);

impl Handle {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
