//! Lifecycle-bound auto-release of bindings.
//!
//! Every host object owns one [`AutoRelease`] scope. The event bus and the
//! value stores register an unsubscribe/unbind action with it whenever a
//! binding is created, and the host fires [`AutoRelease::dispose`] exactly
//! once when the object is destroyed. Owners therefore never have to
//! unsubscribe by hand.

use crate::error::LifecycleError;
use crate::utils::lock;
use std::sync::Mutex;
use tracing::{debug, trace};

/// A release action run when the owning scope is disposed.
pub type ReleaseAction = Box<dyn FnOnce() + Send + 'static>;

/// Handle to one registered release action, used to withdraw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReleaseKey(u64);

struct PendingActions {
    next: u64,
    actions: Vec<(ReleaseKey, ReleaseAction)>,
}

enum ScopeState {
    Pending(PendingActions),
    Disposed,
}

/// Per-host-object registry of release actions.
pub struct AutoRelease {
    label: String,
    state: Mutex<ScopeState>,
}

impl AutoRelease {
    /// Creates an empty scope. `label` names the owner in log output.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(ScopeState::Pending(PendingActions {
                next: 0,
                actions: Vec::new(),
            })),
        }
    }

    /// Appends a release action and returns the key that withdraws it.
    ///
    /// After disposal the action is dropped without running and
    /// [`LifecycleError::AlreadyDisposed`] is returned.
    pub fn register<F>(&self, action: F) -> Result<ReleaseKey, LifecycleError>
    where
        F: FnOnce() + Send + 'static,
    {
        match &mut *lock(&self.state) {
            ScopeState::Pending(pending) => {
                let key = ReleaseKey(pending.next);
                pending.next += 1;
                pending.actions.push((key, Box::new(action)));
                trace!("Registered release action #{} for {}", pending.actions.len(), self.label);
                Ok(key)
            }
            ScopeState::Disposed => Err(LifecycleError::AlreadyDisposed(self.label.clone())),
        }
    }

    /// Withdraws a pending action without running it.
    ///
    /// Used when a binding is removed by hand before its owner dies. Returns
    /// false for unknown keys and after disposal.
    pub fn unregister(&self, key: ReleaseKey) -> bool {
        let removed = match &mut *lock(&self.state) {
            ScopeState::Pending(pending) => pending
                .actions
                .iter()
                .position(|(k, _)| *k == key)
                .map(|index| pending.actions.remove(index)),
            ScopeState::Disposed => None,
        };
        // The withdrawn action is dropped after the lock is released.
        removed.is_some()
    }

    /// Runs every registered action in registration order, then clears the
    /// list. Only the first call does anything.
    pub fn dispose(&self) {
        let actions = match std::mem::replace(&mut *lock(&self.state), ScopeState::Disposed) {
            ScopeState::Pending(pending) => pending.actions,
            ScopeState::Disposed => return,
        };

        // The lock is released here; actions may touch this scope again.
        debug!("🧹 Releasing {} binding(s) of {}", actions.len(), self.label);
        for (_, action) in actions {
            action();
        }
    }

    /// Returns true once [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        matches!(*lock(&self.state), ScopeState::Disposed)
    }

    /// Number of actions waiting for disposal.
    pub fn pending(&self) -> usize {
        match &*lock(&self.state) {
            ScopeState::Pending(pending) => pending.actions.len(),
            ScopeState::Disposed => 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for AutoRelease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoRelease")
            .field("label", &self.label)
            .field("pending", &self.pending())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_dispose_runs_actions_in_order_once() {
        let scope = AutoRelease::new("player");
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            scope.register(move || log.lock().unwrap().push(i)).unwrap();
        }
        assert_eq!(scope.pending(), 3);

        scope.dispose();
        scope.dispose();

        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert!(scope.is_disposed());
        assert_eq!(scope.pending(), 0);
    }

    #[test]
    fn test_register_after_dispose_is_rejected() {
        let scope = AutoRelease::new("enemy");
        scope.dispose();

        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        let result = scope.register(move || *flag.lock().unwrap() = true);

        assert_eq!(result, Err(LifecycleError::AlreadyDisposed("enemy".to_string())));
        scope.dispose();
        assert!(!*ran.lock().unwrap());
    }

    #[test]
    fn test_unregister_withdraws_one_action() {
        let scope = AutoRelease::new("door");
        let log = Arc::new(Mutex::new(Vec::new()));

        let keys: Vec<ReleaseKey> = (0..3)
            .map(|i| {
                let log = log.clone();
                scope.register(move || log.lock().unwrap().push(i)).unwrap()
            })
            .collect();

        assert!(scope.unregister(keys[1]));
        assert!(!scope.unregister(keys[1]));
        assert_eq!(scope.pending(), 2);

        scope.dispose();
        assert_eq!(*log.lock().unwrap(), vec![0, 2]);
        assert!(!scope.unregister(keys[0]));
    }

    #[test]
    fn test_action_may_register_during_dispose() {
        let scope = Arc::new(AutoRelease::new("reentrant"));
        let inner = scope.clone();
        let result = Arc::new(Mutex::new(None));
        let slot = result.clone();

        scope
            .register(move || {
                *slot.lock().unwrap() = Some(inner.register(|| {}).is_err());
            })
            .unwrap();
        scope.dispose();

        assert_eq!(*result.lock().unwrap(), Some(true));
    }
}
