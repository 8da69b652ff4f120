//! Export registry: the namespace guest modules publish callables into.
//!
//! A guest registers an export by name from inside its entry point. The
//! registry stores an [`ExportHandle`] for it and wakes anyone waiting in
//! [`ExportRegistry::notified`]. Handles are tagged with the generation of
//! the runtime instance that registered them, so a stale instance can never
//! satisfy a readiness check for a newer one.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::futures::Notified;
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::debug;

use calc_bridge_common::CallError;

use crate::abi::{ArgValue, GuestReturn};

/// A request for the runtime task to call one of its exports.
#[derive(Debug)]
pub struct Invocation {
    /// Export to call.
    pub export: Arc<str>,
    /// Arguments, in order.
    pub args: Vec<ArgValue>,
    /// Where the answer goes.
    pub reply: oneshot::Sender<Result<GuestReturn, CallError>>,
}

/// A callable published by a guest module.
#[derive(Debug, Clone)]
pub struct ExportHandle {
    name: Arc<str>,
    generation: u64,
    tx: mpsc::Sender<Invocation>,
}

impl ExportHandle {
    /// Create a handle that forwards calls over `tx`.
    pub fn new(name: impl Into<Arc<str>>, generation: u64, tx: mpsc::Sender<Invocation>) -> Self {
        Self {
            name: name.into(),
            generation,
            tx,
        }
    }

    /// Export name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generation of the runtime instance that registered this handle.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` if the runtime task behind this handle is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Call the export and wait for its answer.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Terminated`] if the runtime task stops before
    /// answering, or whatever error the runtime task reports.
    pub async fn call(&self, args: Vec<ArgValue>) -> Result<GuestReturn, CallError> {
        let (reply, rx) = oneshot::channel();
        let invocation = Invocation {
            export: Arc::clone(&self.name),
            args,
            reply,
        };

        self.tx
            .send(invocation)
            .await
            .map_err(|_| CallError::Terminated)?;

        rx.await.map_err(|_| CallError::Terminated)?
    }
}

/// Shared namespace of guest exports.
#[derive(Debug, Default)]
pub struct ExportRegistry {
    exports: DashMap<String, ExportHandle>,
    changed: Notify,
}

impl ExportRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a handle, replacing any previous one with the same name.
    pub fn register(&self, handle: ExportHandle) {
        debug!(
            export = handle.name(),
            generation = handle.generation(),
            "Export registered"
        );
        self.exports.insert(handle.name().to_string(), handle);
        self.changed.notify_waiters();
    }

    /// Look up a handle by name.
    pub fn get(&self, name: &str) -> Option<ExportHandle> {
        self.exports.get(name).map(|h| h.clone())
    }

    /// Look up a handle by name, only if it belongs to `generation`.
    pub fn get_current(&self, name: &str, generation: u64) -> Option<ExportHandle> {
        self.get(name).filter(|h| h.generation() == generation)
    }

    /// Check whether `generation` has registered `name`.
    pub fn contains(&self, name: &str, generation: u64) -> bool {
        self.exports
            .get(name)
            .is_some_and(|h| h.generation() == generation)
    }

    /// Drop every handle registered by `generation`.
    ///
    /// Returns how many handles were removed.
    pub fn remove_generation(&self, generation: u64) -> usize {
        let before = self.exports.len();
        self.exports.retain(|_, h| h.generation() != generation);
        let removed = before - self.exports.len();
        if removed > 0 {
            self.changed.notify_waiters();
        }
        removed
    }

    /// A future that completes on the next registry change.
    ///
    /// The future observes changes made after it was created, even before it
    /// is first polled, so create it before checking the registry.
    pub fn notified(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Names of all registered exports.
    pub fn names(&self) -> Vec<String> {
        self.exports.iter().map(|r| r.key().clone()).collect()
    }

    /// Number of registered exports.
    pub fn len(&self) -> usize {
        self.exports.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn handle(name: &str, generation: u64) -> (ExportHandle, mpsc::Receiver<Invocation>) {
        let (tx, rx) = mpsc::channel(4);
        (ExportHandle::new(name, generation, tx), rx)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ExportRegistry::new();
        let (h, _rx) = handle("add", 1);

        registry.register(h);

        assert!(registry.contains("add", 1));
        assert!(!registry.contains("add", 2));
        assert!(registry.get_current("add", 1).is_some());
        assert!(registry.get_current("add", 2).is_none());
        assert_eq!(registry.names(), vec!["add"]);
    }

    #[test]
    fn test_remove_generation() {
        let registry = ExportRegistry::new();
        let (a, _ra) = handle("add", 1);
        let (b, _rb) = handle("sub", 2);
        registry.register(a);
        registry.register(b);

        assert_eq!(registry.remove_generation(1), 1);
        assert!(!registry.contains("add", 1));
        assert!(registry.contains("sub", 2));
        assert_eq!(registry.remove_generation(1), 0);
    }

    #[tokio::test]
    async fn test_notified_before_register() {
        let registry = Arc::new(ExportRegistry::new());
        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let notified = registry.notified();
                if !registry.contains("add", 7) {
                    notified.await;
                }
                registry.contains("add", 7)
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let (h, _rx) = handle("add", 7);
        registry.register(h);

        let found = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(found);
    }

    #[tokio::test]
    async fn test_handle_call_roundtrip() {
        let (h, mut rx) = handle("add", 1);

        tokio::spawn(async move {
            while let Some(inv) = rx.recv().await {
                let sum = inv
                    .args
                    .iter()
                    .map(|a| match a {
                        ArgValue::Number(n) => *n as i64,
                        _ => 0,
                    })
                    .sum();
                let _ = inv.reply.send(Ok(GuestReturn::Value(sum)));
            }
        });

        let result = h
            .call(vec![ArgValue::Number(15.0), ArgValue::Number(7.0)])
            .await
            .unwrap();
        assert_eq!(result, GuestReturn::Value(22));
    }

    #[tokio::test]
    async fn test_handle_call_after_runtime_gone() {
        let (h, rx) = handle("add", 1);
        drop(rx);

        assert!(h.is_closed());
        let err = h.call(vec![]).await.unwrap_err();
        assert!(matches!(err, CallError::Terminated));
    }
}
