//! Owner capabilities and the host object stand-in.
//!
//! Bindings never hold their host object. They hold an [`Owner`]: a small
//! capability that answers "is the object still alive?" and "is it active?"
//! and, optionally, hands out the object's [`AutoRelease`] scope.

use crate::lifecycle::AutoRelease;
use crate::types::ObjectId;
use compact_str::CompactString;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Liveness/activity queries a host object exposes to its bindings.
pub trait OwnerCapability: Send + Sync {
    /// False once the host object has been destroyed. Dead bindings are
    /// pruned at the next dispatch.
    fn is_alive(&self) -> bool;

    /// False while the host object is deactivated. Inactive bindings are
    /// skipped but stay registered.
    fn is_active(&self) -> bool;

    /// The owner's release scope, created on first use.
    fn release_scope(&self) -> Option<Arc<AutoRelease>> {
        None
    }

    /// Human-readable label for logs.
    fn describe(&self) -> String {
        "<owner>".to_string()
    }
}

/// Shared handle to an owner capability.
pub type Owner = Arc<dyn OwnerCapability>;

/// Returns an owner that is always alive and active and has no release
/// scope, for bindings made outside of any host object.
pub fn detached_owner() -> Owner {
    Arc::new(DetachedOwner)
}

struct DetachedOwner;

impl OwnerCapability for DetachedOwner {
    fn is_alive(&self) -> bool {
        true
    }

    fn is_active(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "<detached>".to_string()
    }
}

struct HostState {
    id: ObjectId,
    name: CompactString,
    alive: AtomicBool,
    active: AtomicBool,
    release: OnceCell<Arc<AutoRelease>>,
}

impl HostState {
    fn label(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }

    fn destroy(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        self.active.store(false, Ordering::Release);
        debug!("💥 Host object {} destroyed", self.label());
        if let Some(scope) = self.release.get() {
            scope.dispose();
        }
    }
}

impl Drop for HostState {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Minimal host object: identity, liveness, activity and a release scope.
///
/// The host runtime owns these; clones share the same object. Destruction
/// happens through [`destroy`](Self::destroy) or when the last handle is
/// dropped, whichever comes first, and fires the release scope once.
#[derive(Clone)]
pub struct HostObject {
    state: Arc<HostState>,
}

impl HostObject {
    /// Creates a live, active host object.
    pub fn new(name: &str) -> Self {
        Self {
            state: Arc::new(HostState {
                id: ObjectId::new(),
                name: CompactString::new(name),
                alive: AtomicBool::new(true),
                active: AtomicBool::new(true),
                release: OnceCell::new(),
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.state.id
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.is_alive() && self.state.active.load(Ordering::Acquire)
    }

    /// Activates or deactivates the object. Has no effect once destroyed.
    pub fn set_active(&self, active: bool) {
        if self.is_alive() {
            self.state.active.store(active, Ordering::Release);
        }
    }

    /// Destroys the object and disposes its release scope. Idempotent.
    pub fn destroy(&self) {
        self.state.destroy();
    }

    /// The weak owner capability handed to bindings.
    pub fn owner(&self) -> Owner {
        Arc::new(HostOwner {
            state: Arc::downgrade(&self.state),
        })
    }

    /// The release scope, created on first use. `None` once destroyed.
    pub fn release_scope(&self) -> Option<Arc<AutoRelease>> {
        release_scope_of(&self.state)
    }
}

impl std::fmt::Debug for HostObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostObject")
            .field("id", &self.state.id)
            .field("name", &self.state.name)
            .field("alive", &self.is_alive())
            .field("active", &self.is_active())
            .finish()
    }
}

fn release_scope_of(state: &HostState) -> Option<Arc<AutoRelease>> {
    if !state.alive.load(Ordering::Acquire) {
        return None;
    }
    Some(
        state
            .release
            .get_or_init(|| Arc::new(AutoRelease::new(state.label())))
            .clone(),
    )
}

struct HostOwner {
    state: Weak<HostState>,
}

impl OwnerCapability for HostOwner {
    fn is_alive(&self) -> bool {
        self.state
            .upgrade()
            .is_some_and(|state| state.alive.load(Ordering::Acquire))
    }

    fn is_active(&self) -> bool {
        self.state.upgrade().is_some_and(|state| {
            state.alive.load(Ordering::Acquire) && state.active.load(Ordering::Acquire)
        })
    }

    fn release_scope(&self) -> Option<Arc<AutoRelease>> {
        self.state.upgrade().and_then(|state| release_scope_of(&state))
    }

    fn describe(&self) -> String {
        self.state
            .upgrade()
            .map(|state| state.label())
            .unwrap_or_else(|| "<destroyed>".to_string())
    }
}
