//! Name-keyed event bus with separate zero-argument and one-argument tables.
//!
//! Handlers are stored in registration order per name. Dispatch works on a
//! snapshot of the list taken without holding any table guard, so handlers
//! may subscribe, unsubscribe or publish again while a publish is running.

use crate::config::EventSettings;
use crate::lifecycle::ReleaseKey;
use crate::owner::Owner;
use crate::types::HandlerId;
use crate::utils::{lock, short_type_name};
use compact_str::CompactString;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace};

/// Statistics for event bus monitoring
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EventBusStats {
    /// Number of publish calls, including those without subscribers
    pub events_published: u64,
    /// Number of handler invocations
    pub handlers_invoked: u64,
    /// Number of bindings dropped because their owner died
    pub bindings_pruned: u64,
    /// Handlers currently registered across both tables
    pub total_handlers: usize,
}

struct NoArgCallback {
    call: Box<dyn Fn() + Send + Sync>,
}

struct OneArgCallback {
    arg_type: TypeId,
    arg_type_name: &'static str,
    call: Box<dyn Fn(&dyn Any) + Send + Sync>,
}

struct EventBinding<C> {
    id: HandlerId,
    owner: Owner,
    registered: AtomicBool,
    /// Auto-release action to withdraw when the binding goes first
    release: Option<ReleaseKey>,
    callback: C,
}

impl<C> EventBinding<C> {
    fn new(id: HandlerId, owner: Owner, release: Option<ReleaseKey>, callback: C) -> Self {
        Self {
            id,
            owner,
            registered: AtomicBool::new(true),
            release,
            callback,
        }
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Marks the binding removed and withdraws its auto-release action.
    /// Must not be called while a table guard is held.
    fn retire(&self) {
        if !self.registered.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(key) = self.release {
            if let Some(scope) = self.owner.release_scope() {
                scope.unregister(key);
            }
        }
    }
}

type BindingList<C> = SmallVec<[Arc<EventBinding<C>>; 4]>;

struct HandlerTable<C> {
    entries: DashMap<CompactString, BindingList<C>>,
}

impl<C> HandlerTable<C> {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn push(&self, name: CompactString, binding: Arc<EventBinding<C>>) {
        self.entries.entry(name).or_default().push(binding);
    }

    fn snapshot(&self, name: &str) -> Option<BindingList<C>> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    /// Removes every binding whose id is in `ids`; returns how many went.
    fn remove_ids(&self, name: &str, ids: &[HandlerId]) -> usize {
        let (removed, empty) = match self.entries.get_mut(name) {
            Some(mut entry) => {
                let mut removed: BindingList<C> = SmallVec::new();
                entry.retain(|binding| {
                    let keep = !ids.contains(&binding.id);
                    if !keep {
                        removed.push(binding.clone());
                    }
                    keep
                });
                (removed, entry.is_empty())
            }
            None => return 0,
        };

        if empty {
            self.entries.remove_if(name, |_, list| list.is_empty());
        }
        for binding in &removed {
            binding.retire();
        }
        removed.len()
    }

    fn count(&self, name: &str) -> usize {
        self.entries.get(name).map_or(0, |entry| entry.len())
    }

    fn total(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }

    fn clear(&self) {
        let names: Vec<CompactString> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            if let Some((_, list)) = self.entries.remove(&name) {
                for binding in &list {
                    binding.retire();
                }
            }
        }
    }
}

struct BusTables {
    no_arg: HandlerTable<NoArgCallback>,
    one_arg: HandlerTable<OneArgCallback>,
    stats: Mutex<EventBusStats>,
    log_unhandled: bool,
}

impl BusTables {
    fn remove_handler(&self, name: &str, id: HandlerId) -> bool {
        let removed = self.no_arg.remove_ids(name, &[id]) + self.one_arg.remove_ids(name, &[id]);
        removed > 0
    }

    fn note_unhandled(&self, name: &str) {
        if self.log_unhandled {
            debug!("No handlers for event: {}", name);
        } else {
            trace!("No handlers for event: {}", name);
        }
    }

    /// Walks a snapshot of `name`'s bindings. Retired bindings are skipped,
    /// dead owners are pruned afterwards, inactive owners are skipped.
    fn dispatch<C>(
        &self,
        table: &HandlerTable<C>,
        name: &str,
        mut invoke: impl FnMut(&C) -> bool,
    ) -> usize {
        lock(&self.stats).events_published += 1;

        let Some(snapshot) = table.snapshot(name) else {
            self.note_unhandled(name);
            return 0;
        };

        let mut invoked = 0;
        let mut dead: SmallVec<[HandlerId; 4]> = SmallVec::new();

        for binding in snapshot.iter() {
            if !binding.is_registered() {
                continue;
            }
            if !binding.owner.is_alive() {
                dead.push(binding.id);
                continue;
            }
            if !binding.owner.is_active() {
                trace!("Skipping handler {} on '{}': owner inactive", binding.id, name);
                continue;
            }
            if invoke(&binding.callback) {
                invoked += 1;
            }
        }

        let pruned = if dead.is_empty() {
            0
        } else {
            let pruned = table.remove_ids(name, &dead);
            trace!("Pruned {} dead handler(s) from '{}'", pruned, name);
            pruned
        };

        let mut stats = lock(&self.stats);
        stats.handlers_invoked += invoked as u64;
        stats.bindings_pruned += pruned as u64;
        invoked
    }
}

/// The event bus.
///
/// Cloning is cheap and shares the same tables.
#[derive(Clone)]
pub struct EventBus {
    tables: Arc<BusTables>,
}

impl EventBus {
    /// Creates an event bus with default settings.
    pub fn new() -> Self {
        Self::with_settings(&EventSettings::default())
    }

    /// Creates an event bus from the `[events]` configuration section.
    pub fn with_settings(settings: &EventSettings) -> Self {
        Self {
            tables: Arc::new(BusTables {
                no_arg: HandlerTable::new(),
                one_arg: HandlerTable::new(),
                stats: Mutex::new(EventBusStats::default()),
                log_unhandled: settings.log_unhandled,
            }),
        }
    }

    /// Registers a zero-argument handler for `name`.
    ///
    /// The handler is appended after any existing ones; identical handlers
    /// are not deduplicated. When the owner exposes a release scope the
    /// handler is unsubscribed automatically on the owner's destruction.
    pub fn subscribe<F>(&self, name: &str, owner: Owner, handler: F) -> HandlerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = HandlerId::new();
        let key = CompactString::new(name);
        let release = self.register_auto_release(key.clone(), &owner, id);
        debug!("📝 Subscribed handler {} to '{}' for {}", id, name, owner.describe());

        let callback = NoArgCallback {
            call: Box::new(handler),
        };
        self.tables
            .no_arg
            .push(key, Arc::new(EventBinding::new(id, owner, release, callback)));
        id
    }

    /// Registers a one-argument handler for `name`.
    ///
    /// It only runs for [`publish_with`](Self::publish_with) calls whose
    /// argument type is exactly `T`.
    pub fn subscribe_with<T, F>(&self, name: &str, owner: Owner, handler: F) -> HandlerId
    where
        T: Any,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId::new();
        let key = CompactString::new(name);
        let release = self.register_auto_release(key.clone(), &owner, id);
        debug!(
            "📝 Subscribed handler {} to '{}<{}>' for {}",
            id,
            name,
            short_type_name(std::any::type_name::<T>()),
            owner.describe()
        );

        let callback = OneArgCallback {
            arg_type: TypeId::of::<T>(),
            arg_type_name: std::any::type_name::<T>(),
            call: Box::new(move |arg: &dyn Any| {
                if let Some(arg) = arg.downcast_ref::<T>() {
                    handler(arg);
                }
            }),
        };
        self.tables
            .one_arg
            .push(key, Arc::new(EventBinding::new(id, owner, release, callback)));
        id
    }

    fn register_auto_release(&self, key: CompactString, owner: &Owner, id: HandlerId) -> Option<ReleaseKey> {
        let scope = owner.release_scope()?;
        let tables: Weak<BusTables> = Arc::downgrade(&self.tables);
        let registered = scope.register(move || {
            if let Some(tables) = tables.upgrade() {
                tables.remove_handler(&key, id);
            }
        });
        match registered {
            Ok(release) => Some(release),
            Err(e) => {
                // The binding is still pruned by the next publish.
                debug!("Auto-release not registered for handler {}: {}", id, e);
                None
            }
        }
    }

    /// Removes the handler with the given id from both tables of `name`.
    ///
    /// Returns whether a handler was removed; an unknown id is a no-op.
    pub fn unsubscribe(&self, name: &str, id: HandlerId) -> bool {
        let removed = self.tables.remove_handler(name, id);
        if removed {
            debug!("🗑️ Unsubscribed handler {} from '{}'", id, name);
        }
        removed
    }

    /// Invokes every live zero-argument handler of `name` in registration
    /// order and returns how many ran.
    pub fn publish(&self, name: &str) -> usize {
        trace!("📤 Publishing '{}'", name);
        self.tables.dispatch(&self.tables.no_arg, name, |callback| {
            (callback.call)();
            true
        })
    }

    /// Invokes every live one-argument handler of `name` declared for `T`
    /// in registration order and returns how many ran.
    pub fn publish_with<T: Any>(&self, name: &str, arg: &T) -> usize {
        trace!(
            "📤 Publishing '{}<{}>'",
            name,
            short_type_name(std::any::type_name::<T>())
        );
        let arg_type = TypeId::of::<T>();
        self.tables.dispatch(&self.tables.one_arg, name, |callback| {
            if callback.arg_type != arg_type {
                trace!(
                    "Skipping handler on '{}': expects '{}'",
                    name,
                    short_type_name(callback.arg_type_name)
                );
                return false;
            }
            (callback.call)(arg as &dyn Any);
            true
        })
    }

    /// Number of handlers registered for `name` across both tables.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.tables.no_arg.count(name) + self.tables.one_arg.count(name)
    }

    /// True when `name` has at least one handler in either table.
    pub fn has_subscribers(&self, name: &str) -> bool {
        self.subscriber_count(name) > 0
    }

    /// All names with at least one handler, sorted.
    pub fn registered_names(&self) -> Vec<CompactString> {
        let mut names: Vec<CompactString> = self
            .tables
            .no_arg
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.tables.one_arg.entries.iter().map(|entry| entry.key().clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Drops every handler of both tables. Idempotent.
    pub fn clear(&self) {
        let total = self.tables.no_arg.total() + self.tables.one_arg.total();
        self.tables.no_arg.clear();
        self.tables.one_arg.clear();
        if total > 0 {
            debug!("🧹 Event bus cleared ({} handlers)", total);
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> EventBusStats {
        let mut stats = lock(&self.tables.stats).clone();
        stats.total_handlers = self.tables.no_arg.total() + self.tables.one_arg.total();
        stats
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("no_arg_names", &self.tables.no_arg.entries.len())
            .field("one_arg_names", &self.tables.one_arg.entries.len())
            .finish()
    }
}
