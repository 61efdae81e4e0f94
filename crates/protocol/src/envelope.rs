use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Handle;

/// A named occurrence waiting to be delivered to host callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub args: Vec<String>,
}

impl Event {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// An inbound method call made by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub method: String,
    pub args: Vec<Value>,
}

impl ServerMessage {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    /// Converts the call into an event whose arguments are strings.
    pub fn into_event(self) -> Event {
        let args = stringify_args(&self.args);
        Event::new(self.method, args)
    }

    /// Compact one-line JSON rendering, used by the pull-style message queue.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Outcome of one outbound request, tagged with the caller's handle.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncResult {
    pub handle: Handle,
    pub outcome: Result<Value, String>,
}

impl AsyncResult {
    pub fn success(handle: Handle, value: Value) -> Self {
        Self {
            handle,
            outcome: Ok(value),
        }
    }

    pub fn failure(handle: Handle, error: impl Into<String>) -> Self {
        Self {
            handle,
            outcome: Err(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Positional arguments for the completion callback: `(true, value)` or
    /// `(false, error)`.
    pub fn into_call_args(self) -> Vec<CallArg> {
        match self.outcome {
            Ok(value) => vec![CallArg::Bool(true), CallArg::Json(value)],
            Err(error) => vec![CallArg::Bool(false), CallArg::Text(error)],
        }
    }
}

/// One positional argument handed to a host callable.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Text(String),
    Bool(bool),
    /// Opaque transport value, converted by the host as it sees fit.
    Json(Value),
}

impl CallArg {
    /// Text view of the argument, if it is a string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CallArg::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for CallArg {
    fn from(s: String) -> Self {
        CallArg::Text(s)
    }
}

impl From<&str> for CallArg {
    fn from(s: &str) -> Self {
        CallArg::Text(s.to_string())
    }
}

/// Converts opaque transport values into event arguments.
///
/// Strings pass through, numbers and booleans use their textual form,
/// arrays and objects become compact JSON. `null` carries no information
/// and is dropped.
pub fn stringify_args(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Array(_) | Value::Object(_) => Some(v.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stringify_mixed_values() {
        let args = stringify_args(&[
            json!("hello"),
            json!(42),
            json!(1.5),
            json!(true),
            Value::Null,
            json!([1, 2]),
            json!({"a": 1}),
        ]);
        assert_eq!(
            args,
            vec!["hello", "42", "1.5", "true", "[1,2]", "{\"a\":1}"]
        );
    }

    #[test]
    fn server_message_into_event() {
        let msg = ServerMessage::new("ReceiveMessage", vec![json!("alice"), json!(false)]);
        let event = msg.into_event();
        assert_eq!(event.name, "ReceiveMessage");
        assert_eq!(event.args, vec!["alice", "false"]);
    }

    #[test]
    fn server_message_json_line() {
        let msg = ServerMessage::new("Tick", vec![json!(7)]);
        let line = msg.to_json_line().unwrap();
        assert_eq!(line, r#"{"method":"Tick","args":[7]}"#);
        assert!(!line.contains('\n'));
    }

    #[test]
    fn async_result_call_args() {
        let ok = AsyncResult::success(Handle::new(3), json!({"id": 9}));
        assert!(ok.is_success());
        assert_eq!(
            ok.into_call_args(),
            vec![CallArg::Bool(true), CallArg::Json(json!({"id": 9}))]
        );

        let err = AsyncResult::failure(Handle::new(4), "Invoke failed");
        assert!(!err.is_success());
        let args = err.into_call_args();
        assert_eq!(args[0], CallArg::Bool(false));
        assert_eq!(args[1].as_text(), Some("Invoke failed"));
    }
}
