use std::time::Duration;

/// Emitted once the initial connection of an episode is established.
pub const EVENT_CONNECTED: &str = "connected";

/// Emitted when the connection closes without an error.
pub const EVENT_DISCONNECTED: &str = "disconnected";

/// Emitted on any transport failure. Carries one message argument.
pub const EVENT_ERROR: &str = "error";

/// Emitted before each reconnect attempt. Carries the attempt number.
pub const EVENT_RECONNECTING: &str = "reconnecting";

/// Emitted when a reconnect attempt succeeds.
pub const EVENT_RECONNECTED: &str = "reconnected";

/// Events produced by the bridge itself rather than by the server.
pub const INTERNAL_EVENTS: [&str; 5] = [
    EVENT_CONNECTED,
    EVENT_DISCONNECTED,
    EVENT_ERROR,
    EVENT_RECONNECTING,
    EVENT_RECONNECTED,
];

/// Returns `true` if `name` is one of the bridge's own lifecycle events.
pub fn is_internal_event(name: &str) -> bool {
    INTERNAL_EVENTS.contains(&name)
}

/// Hard limit for a connection start to report success or failure.
pub const START_TIMEOUT: Duration = Duration::from_secs(15);

/// Bounded wait for a connection stop to complete.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Backoff exponent cap, keeps `multiplier^n` finite.
pub const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Header carrying the access token, passed to the transport unchanged.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Scheme assumed when a URL has none.
pub const DEFAULT_SCHEME: &str = "https";

/// Schemes the underlying hub transport accepts.
pub const SUPPORTED_SCHEMES: [&str; 2] = ["http", "https"];

/// Message carried by the terminal `error` event when reconnection gives up.
pub const GIVE_UP_MESSAGE: &str = "Max reconnection attempts reached";
