use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Names of server-invoked methods the host wants routed to it.
///
/// Snapshotted each time a connection object is built, so changes apply
/// from the next connect or reconnect onwards.
#[derive(Debug, Default)]
pub struct ServerMethodRegistry {
    methods: Mutex<BTreeSet<String>>,
}

impl ServerMethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the method was already registered.
    pub fn register(&self, method: &str) -> bool {
        self.lock().insert(method.to_string())
    }

    /// Returns `false` if the method was not registered.
    pub fn unregister(&self, method: &str) -> bool {
        self.lock().remove(method)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.lock().contains(method)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.methods.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let reg = ServerMethodRegistry::new();
        assert!(reg.register("ReceiveMessage"));
        assert!(!reg.register("ReceiveMessage"));
        assert_eq!(reg.len(), 1);
        assert!(reg.contains("ReceiveMessage"));
    }

    #[test]
    fn unregister_removes() {
        let reg = ServerMethodRegistry::new();
        reg.register("A");
        assert!(reg.unregister("A"));
        assert!(!reg.unregister("A"));
        assert!(reg.is_empty());
    }

    #[test]
    fn snapshot_is_detached() {
        let reg = ServerMethodRegistry::new();
        reg.register("B");
        reg.register("A");
        let snap = reg.snapshot();
        reg.register("C");
        assert_eq!(snap, vec!["A", "B"]);
        assert_eq!(reg.len(), 3);
    }
}
