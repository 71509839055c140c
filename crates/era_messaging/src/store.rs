//! Keyed shared-value store with change propagation.
//!
//! Values are type-erased; each key holds whatever was last written to it.
//! Cells bound to a key receive writes of their own type. A store is either
//! [`StoreKind::Persistent`] or [`StoreKind::Temporary`]; only the latter
//! reacts to [`ValueStore::on_scope_boundary`].

use crate::config::RequestSettings;
use crate::error::RequestError;
use crate::lifecycle::ReleaseKey;
use crate::observable::ObservableValue;
use crate::owner::Owner;
use crate::types::CellId;
use crate::utils::{lock, short_type_name};
use compact_str::CompactString;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace, warn};

/// Bound required of anything stored as a request value.
pub trait RequestValue: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T> RequestValue for T where T: Clone + PartialEq + Debug + Send + Sync + 'static {}

/// Which lifetime policy a store follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreKind {
    /// Values live until removed or until teardown
    Persistent,
    /// Values are flushed at every scope boundary unless flagged temporary
    Temporary,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Persistent => write!(f, "requests"),
            StoreKind::Temporary => write!(f, "temp_requests"),
        }
    }
}

/// Statistics for value store monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueStoreStats {
    pub kind: StoreKind,
    /// Number of `set` calls
    pub writes: u64,
    /// Number of values delivered to bound cells
    pub notifications: u64,
    /// Bindings dropped because their owner died or their cell was dropped
    pub bindings_pruned: u64,
    /// Keys currently holding a value
    pub entries: usize,
    /// Cell bindings currently registered
    pub bindings: usize,
}

/// A cell registered against a key, as seen by the store.
pub(crate) trait CellBinding: Send + Sync {
    fn cell_id(&self) -> CellId;
    fn owner(&self) -> &Owner;
    fn value_type(&self) -> TypeId;
    /// False once the cell itself has been dropped.
    fn cell_exists(&self) -> bool;
    /// Delivers a stored value; returns whether the cell changed.
    fn apply(&self, value: &dyn Any) -> bool;
    /// The store dropped this binding. A cell linked through it forgets
    /// the link so it can be bound again.
    fn detach(&self);

    fn is_live(&self) -> bool {
        self.cell_exists() && self.owner().is_alive()
    }
}

/// A binding as held in a key's list.
struct BoundCell {
    binding: Arc<dyn CellBinding>,
    registered: AtomicBool,
    release: Option<ReleaseKey>,
}

impl BoundCell {
    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Marks the binding removed, unlinks its cell and withdraws its
    /// auto-release action. Must not be called while a table guard is held.
    fn retire(&self) {
        if !self.registered.swap(false, Ordering::AcqRel) {
            return;
        }
        self.binding.detach();
        if let Some(key) = self.release {
            if let Some(scope) = self.binding.owner().release_scope() {
                scope.unregister(key);
            }
        }
    }
}

struct StoreEntry {
    value: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

type CellList = SmallVec<[Arc<BoundCell>; 2]>;

struct StoreTables {
    kind: StoreKind,
    values: DashMap<CompactString, StoreEntry>,
    bindings: DashMap<CompactString, CellList>,
    temporary: DashSet<CompactString>,
    stats: Mutex<ValueStoreStats>,
    warn_on_type_mismatch: bool,
}

impl StoreTables {
    fn remove_cells(&self, name: &str, ids: &[CellId]) -> usize {
        let (removed, empty) = match self.bindings.get_mut(name) {
            Some(mut list) => {
                let mut removed: CellList = SmallVec::new();
                list.retain(|cell| {
                    let keep = !ids.contains(&cell.binding.cell_id());
                    if !keep {
                        removed.push(cell.clone());
                    }
                    keep
                });
                (removed, list.is_empty())
            }
            None => return 0,
        };
        if empty {
            self.bindings.remove_if(name, |_, list| list.is_empty());
        }
        for cell in &removed {
            cell.retire();
        }
        removed.len()
    }

    /// Drops every binding of `name`; returns how many went.
    fn remove_key(&self, name: &str) -> usize {
        let Some((_, list)) = self.bindings.remove(name) else {
            return 0;
        };
        for cell in &list {
            cell.retire();
        }
        list.len()
    }

    fn snapshot(&self, name: &str) -> Option<CellList> {
        self.bindings.get(name).map(|entry| entry.value().clone())
    }

    fn binding_total(&self) -> usize {
        self.bindings.iter().map(|entry| entry.value().len()).sum()
    }

    fn note_pruned(&self, count: usize) {
        if count > 0 {
            lock(&self.stats).bindings_pruned += count as u64;
        }
    }
}

/// The value store.
///
/// Cloning is cheap and shares the same tables.
#[derive(Clone)]
pub struct ValueStore {
    tables: Arc<StoreTables>,
}

impl ValueStore {
    pub fn new(kind: StoreKind) -> Self {
        Self::with_settings(kind, &RequestSettings::default())
    }

    /// Creates a store from the `[requests]` configuration section.
    pub fn with_settings(kind: StoreKind, settings: &RequestSettings) -> Self {
        Self {
            tables: Arc::new(StoreTables {
                kind,
                values: DashMap::new(),
                bindings: DashMap::new(),
                temporary: DashSet::new(),
                stats: Mutex::new(ValueStoreStats {
                    kind,
                    writes: 0,
                    notifications: 0,
                    bindings_pruned: 0,
                    entries: 0,
                    bindings: 0,
                }),
                warn_on_type_mismatch: settings.warn_on_type_mismatch,
            }),
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.tables.kind
    }

    /// Writes `value` under `name`, replacing any previous value of any
    /// type, then pushes it into every live cell of type `T` bound to
    /// `name` in registration order.
    pub fn set<T: RequestValue>(&self, name: &str, value: T) {
        self.tables.values.insert(
            CompactString::new(name),
            StoreEntry {
                value: Arc::new(value.clone()),
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            },
        );
        lock(&self.tables.stats).writes += 1;
        trace!("📥 [{}] '{}' = {:?}", self.tables.kind, name, value);

        let Some(cells) = self.tables.snapshot(name) else {
            return;
        };

        let value_type = TypeId::of::<T>();
        let mut delivered = 0u64;
        let mut dead: SmallVec<[CellId; 2]> = SmallVec::new();

        for cell in cells.iter() {
            // Unbound earlier in this write, possibly by another cell's callback.
            if !cell.is_registered() {
                continue;
            }
            let binding = &cell.binding;
            if !binding.is_live() {
                dead.push(binding.cell_id());
                continue;
            }
            if !binding.owner().is_active() || binding.value_type() != value_type {
                continue;
            }
            if binding.apply(&value) {
                delivered += 1;
            }
        }

        if !dead.is_empty() {
            let pruned = self.tables.remove_cells(name, &dead);
            trace!("Pruned {} dead cell(s) from '{}'", pruned, name);
            self.tables.note_pruned(pruned);
        }
        lock(&self.tables.stats).notifications += delivered;
    }

    /// Reads the value under `name` as a `T`.
    pub fn try_get<T: RequestValue>(&self, name: &str) -> Result<T, RequestError> {
        let entry = self
            .tables
            .values
            .get(name)
            .ok_or_else(|| RequestError::NotFound(CompactString::new(name)))?;

        entry
            .value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| RequestError::TypeMismatch {
                key: CompactString::new(name),
                expected: std::any::type_name::<T>(),
                found: entry.type_name,
            })
    }

    /// Reads the value under `name`, falling back to `T::default()` when it
    /// is missing or of another type.
    pub fn get_or_default<T: RequestValue + Default>(&self, name: &str) -> T {
        match self.try_get(name) {
            Ok(value) => value,
            Err(e) => {
                trace!("{}; using default", e);
                T::default()
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.values.contains_key(name)
    }

    /// Type of the value under `name`, if any.
    pub(crate) fn stored_type(&self, name: &str) -> Option<TypeId> {
        self.tables.values.get(name).map(|entry| entry.type_id)
    }

    /// Binds `cell` to `name` for `owner`.
    ///
    /// If a value of type `T` is already stored it is pushed into the cell.
    /// The owner's release scope, if any, receives an unbind action. Prefer
    /// [`ObservableValue::bind_to_store`], which also links the cell back.
    pub fn bind<T: RequestValue>(&self, name: &str, owner: Owner, cell: &ObservableValue<T>) -> CellId {
        self.bind_cell(name, cell.store_binding(owner))
    }

    pub(crate) fn bind_cell(&self, name: &str, binding: Arc<dyn CellBinding>) -> CellId {
        let id = binding.cell_id();
        let key = CompactString::new(name);
        let release = self.register_auto_release(key.clone(), binding.owner(), id);
        debug!(
            "🔗 Bound cell {} to [{}] '{}' for {}",
            id,
            self.tables.kind,
            name,
            binding.owner().describe()
        );
        self.tables.bindings.entry(key).or_default().push(Arc::new(BoundCell {
            binding: binding.clone(),
            registered: AtomicBool::new(true),
            release,
        }));

        let existing = self
            .tables
            .values
            .get(name)
            .map(|entry| (entry.value.clone(), entry.type_id, entry.type_name));

        if let Some((value, type_id, type_name)) = existing {
            if type_id == binding.value_type() {
                binding.apply(value.as_ref());
            } else if self.tables.warn_on_type_mismatch {
                warn!(
                    "⚠️ [{}] '{}' holds a '{}' value; cell {} keeps its local value",
                    self.tables.kind,
                    name,
                    short_type_name(type_name),
                    id
                );
            }
        }

        id
    }

    fn register_auto_release(&self, key: CompactString, owner: &Owner, id: CellId) -> Option<ReleaseKey> {
        let scope = owner.release_scope()?;
        let tables: Weak<StoreTables> = Arc::downgrade(&self.tables);
        let registered = scope.register(move || {
            if let Some(tables) = tables.upgrade() {
                tables.remove_cells(&key, &[id]);
            }
        });
        match registered {
            Ok(release) => Some(release),
            Err(e) => {
                debug!("Auto-release not registered for cell {}: {}", id, e);
                None
            }
        }
    }

    /// Removes a cell's binding from `name`. Unknown cells are a no-op.
    pub fn unbind(&self, name: &str, cell: CellId) -> bool {
        let removed = self.tables.remove_cells(name, &[cell]) > 0;
        if removed {
            debug!("Unbound cell {} from [{}] '{}'", cell, self.tables.kind, name);
        }
        removed
    }

    /// Erases the value, the bindings and the temporary flag of `name`.
    pub fn remove(&self, name: &str) -> bool {
        let present = self.tables.values.remove(name).is_some();
        self.tables.temporary.remove(name);
        self.tables.remove_key(name);

        if present {
            debug!("🗑️ [{}] Removed '{}'", self.tables.kind, name);
        } else {
            warn!("⚠️ [{}] Tried to remove '{}', which holds no value", self.tables.kind, name);
        }
        present
    }

    /// Flags `name` so its value survives scope boundaries.
    pub fn mark_temporary(&self, name: &str) {
        if self.tables.temporary.insert(CompactString::new(name)) {
            trace!("[{}] '{}' flagged temporary", self.tables.kind, name);
        }
    }

    /// Flags `name` and writes `value` under it.
    pub fn set_temporary<T: RequestValue>(&self, name: &str, value: T) {
        self.mark_temporary(name);
        self.set(name, value);
    }

    /// Unflags `name` and erases its value. Bindings stay.
    pub fn clear_temporary(&self, name: &str) {
        self.tables.temporary.remove(name);
        self.tables.values.remove(name);
        debug!("[{}] Cleared temporary '{}'", self.tables.kind, name);
    }

    pub fn is_temporary(&self, name: &str) -> bool {
        self.tables.temporary.contains(name)
    }

    /// Flushes the store at a scope boundary.
    ///
    /// Temporary stores keep the values of flagged keys and the live
    /// bindings of those keys; everything else is dropped. Persistent
    /// stores are unaffected.
    pub fn on_scope_boundary(&self) {
        if self.tables.kind == StoreKind::Persistent {
            trace!("[{}] Scope boundary ignored", self.tables.kind);
            return;
        }

        let tables = &self.tables;
        let values_before = tables.values.len();
        tables.values.retain(|key, _| tables.temporary.contains(key));
        let values_dropped = values_before - tables.values.len();

        let keys: Vec<CompactString> = tables.bindings.iter().map(|entry| entry.key().clone()).collect();
        let mut bindings_dropped = 0;
        let mut pruned = 0;

        for key in keys {
            if !tables.temporary.contains(&key) {
                bindings_dropped += tables.remove_key(&key);
                continue;
            }
            let Some(list) = tables.snapshot(&key) else {
                continue;
            };
            let dead: SmallVec<[CellId; 2]> = list
                .iter()
                .filter(|cell| !cell.binding.is_live())
                .map(|cell| cell.binding.cell_id())
                .collect();
            if !dead.is_empty() {
                pruned += tables.remove_cells(&key, &dead);
            }
        }

        tables.note_pruned(pruned);
        debug!(
            "🔄 [{}] Scope boundary: dropped {} value(s) and {} binding(s), pruned {}, kept {} temporary key(s)",
            tables.kind,
            values_dropped,
            bindings_dropped,
            pruned,
            tables.temporary.len()
        );
    }

    /// Drops every value, binding and temporary flag. Bound cells are
    /// unlinked. Idempotent.
    pub fn clear(&self) {
        let entries = self.tables.values.len();
        self.tables.values.clear();
        self.tables.temporary.clear();
        let keys: Vec<CompactString> = self.tables.bindings.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            self.tables.remove_key(&key);
        }
        if entries > 0 {
            debug!("🧹 [{}] Cleared {} value(s)", self.tables.kind, entries);
        }
    }

    /// Number of cells bound to `name`.
    pub fn binding_count(&self, name: &str) -> usize {
        self.tables.bindings.get(name).map_or(0, |list| list.len())
    }

    /// All keys holding a value, sorted.
    pub fn keys(&self) -> Vec<CompactString> {
        let mut keys: Vec<CompactString> = self.tables.values.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> ValueStoreStats {
        let mut stats = lock(&self.tables.stats).clone();
        stats.entries = self.tables.values.len();
        stats.bindings = self.tables.binding_total();
        stats
    }
}

impl std::fmt::Debug for ValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueStore")
            .field("kind", &self.tables.kind)
            .field("entries", &self.tables.values.len())
            .field("temporary", &self.tables.temporary.len())
            .finish()
    }
}
