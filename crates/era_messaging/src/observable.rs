//! Change-notifying value cells.
//!
//! An [`ObservableValue`] holds one value, an optional change callback and
//! an optional link to a store key. Local writes are mirrored to the linked
//! key; writes coming from the store update the cell and fire the callback
//! without being written back.

use crate::owner::Owner;
use crate::store::{CellBinding, RequestValue, ValueStore};
use crate::types::CellId;
use crate::utils::lock;
use compact_str::CompactString;
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace};

type ChangeCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct StoreLink {
    store: ValueStore,
    key: CompactString,
    temporary: bool,
    /// Matches the store-side binding made for this link
    generation: u64,
}

struct CellInner<T> {
    id: CellId,
    value: Mutex<T>,
    callback: Mutex<Option<ChangeCallback<T>>>,
    link: Mutex<Option<StoreLink>>,
    links_made: AtomicU64,
}

impl<T: RequestValue> CellInner<T> {
    /// Stores `value` and fires the callback. False if nothing changed.
    fn replace(&self, value: &T) -> bool {
        {
            let mut current = lock(&self.value);
            if *current == *value {
                return false;
            }
            *current = value.clone();
        }

        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            callback(value);
        }
        true
    }

    fn linked_store(&self) -> Option<(ValueStore, CompactString)> {
        lock(&self.link)
            .as_ref()
            .map(|link| (link.store.clone(), link.key.clone()))
    }
}

/// A shared, change-notifying value cell.
///
/// Clones share one cell. Equality-guarded: writing the current value again
/// does nothing.
pub struct ObservableValue<T> {
    inner: Arc<CellInner<T>>,
}

impl<T> Clone for ObservableValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: RequestValue> ObservableValue<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(CellInner {
                id: CellId::new(),
                value: Mutex::new(value),
                callback: Mutex::new(None),
                link: Mutex::new(None),
                links_made: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Returns a copy of the current value.
    pub fn get(&self) -> T {
        lock(&self.inner.value).clone()
    }

    /// Runs `f` with a borrow of the current value.
    ///
    /// The cell is locked meanwhile; `f` must not write to this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = lock(&self.inner.value);
        f(&*value)
    }

    /// Installs the change callback, replacing any previous one.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        *lock(&self.inner.callback) = Some(Arc::new(callback));
    }

    /// Removes the change callback.
    pub fn clear_on_change(&self) {
        lock(&self.inner.callback).take();
    }

    /// Writes `value`. Returns false and does nothing if it equals the
    /// current value; otherwise fires the callback and then mirrors the
    /// write to the linked store key.
    pub fn set(&self, value: T) -> bool {
        if !self.inner.replace(&value) {
            return false;
        }
        if let Some((store, key)) = self.inner.linked_store() {
            store.set(&key, value);
        }
        true
    }

    /// Overwrites the value without firing the callback or touching the
    /// store, as an inspector edit would.
    pub fn set_without_notify(&self, value: T) {
        *lock(&self.inner.value) = value;
    }

    /// Links the cell to `store[key]` on behalf of `owner`.
    ///
    /// An existing store value of type `T` wins and is pushed into the cell.
    /// Otherwise the cell's value is written to the store, replacing a value
    /// of another type. Returns false without doing anything if the cell is
    /// already linked.
    ///
    /// The link lasts until [`unbind`](Self::unbind), the owner's
    /// destruction, or the store dropping the binding (scope boundary,
    /// `remove`, `clear`). After that the cell may be bound again.
    pub fn bind_to_store(&self, store: &ValueStore, key: &str, owner: Owner) -> bool {
        self.link(store, key, owner, false)
    }

    /// Like [`bind_to_store`](Self::bind_to_store), and also flags `key`
    /// temporary so it survives scope boundaries.
    pub fn bind_temporary(&self, store: &ValueStore, key: &str, owner: Owner) -> bool {
        self.link(store, key, owner, true)
    }

    fn link(&self, store: &ValueStore, key: &str, owner: Owner, temporary: bool) -> bool {
        let generation = {
            let mut link = lock(&self.inner.link);
            if link.is_some() {
                trace!("Cell {} already bound; ignoring bind to '{}'", self.inner.id, key);
                return false;
            }
            let generation = self.inner.links_made.fetch_add(1, Ordering::Relaxed);
            *link = Some(StoreLink {
                store: store.clone(),
                key: CompactString::new(key),
                temporary,
                generation,
            });
            generation
        };

        if temporary {
            store.mark_temporary(key);
        }

        let stored = store.stored_type(key);
        store.bind_cell(key, self.binding(owner, Some(generation)));
        if stored != Some(TypeId::of::<T>()) {
            if stored.is_some() {
                debug!("Cell {} takes over '{}' with its own value type", self.inner.id, key);
            }
            store.set(key, self.get());
        }
        true
    }

    /// Drops the store link and the store's binding of this cell.
    pub fn unbind(&self) -> bool {
        let Some(link) = lock(&self.inner.link).take() else {
            return false;
        };
        link.store.unbind(&link.key, self.inner.id);
        true
    }

    /// The linked key, if any.
    pub fn bound_key(&self) -> Option<CompactString> {
        lock(&self.inner.link).as_ref().map(|link| link.key.clone())
    }

    /// True when linked through [`bind_temporary`](Self::bind_temporary).
    pub fn is_temporary(&self) -> bool {
        lock(&self.inner.link).as_ref().is_some_and(|link| link.temporary)
    }

    /// Writes the current value to the linked store key, if any.
    pub fn publish_current(&self) -> bool {
        match self.inner.linked_store() {
            Some((store, key)) => {
                store.set(&key, self.get());
                true
            }
            None => false,
        }
    }

    /// A store-side binding not tied to a link of this cell.
    pub(crate) fn store_binding(&self, owner: Owner) -> Arc<dyn CellBinding> {
        self.binding(owner, None)
    }

    fn binding(&self, owner: Owner, link: Option<u64>) -> Arc<dyn CellBinding> {
        Arc::new(TypedCellBinding {
            id: self.inner.id,
            owner,
            cell: Arc::downgrade(&self.inner),
            link,
        })
    }
}

impl<T: RequestValue + Default> Default for ObservableValue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: RequestValue> std::fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableValue")
            .field("id", &self.inner.id)
            .field("value", &*lock(&self.inner.value))
            .field("bound_key", &self.bound_key())
            .finish()
    }
}

struct TypedCellBinding<T> {
    id: CellId,
    owner: Owner,
    cell: Weak<CellInner<T>>,
    /// Generation of the cell link this binding backs, if any
    link: Option<u64>,
}

impl<T: RequestValue> CellBinding for TypedCellBinding<T> {
    fn cell_id(&self) -> CellId {
        self.id
    }

    fn owner(&self) -> &Owner {
        &self.owner
    }

    fn value_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn cell_exists(&self) -> bool {
        self.cell.strong_count() > 0
    }

    fn apply(&self, value: &dyn Any) -> bool {
        match (self.cell.upgrade(), value.downcast_ref::<T>()) {
            (Some(cell), Some(value)) => cell.replace(value),
            _ => false,
        }
    }

    fn detach(&self) {
        let (Some(generation), Some(cell)) = (self.link, self.cell.upgrade()) else {
            return;
        };
        let released = {
            let mut link = lock(&cell.link);
            if link.as_ref().is_some_and(|current| current.generation == generation) {
                link.take()
            } else {
                None
            }
        };
        if let Some(link) = released {
            trace!("Cell {} unlinked from '{}' by its store", self.id, link.key);
        }
    }
}

/// Type-erased view of an [`ObservableValue`], used by the attribute binder
/// to drive request fields without knowing their value type.
pub trait ObservableField: Send + Sync {
    fn cell_id(&self) -> CellId;
    fn bind_persistent(&self, store: &ValueStore, key: &str, owner: Owner) -> bool;
    fn bind_temporary(&self, store: &ValueStore, key: &str, owner: Owner) -> bool;
    fn unbind(&self) -> bool;
    fn publish_current(&self) -> bool;
    /// Writes the current value to `store[key]`, linked or not.
    fn write_to(&self, store: &ValueStore, key: &str);
    fn bound_key(&self) -> Option<CompactString>;
    fn value_type_name(&self) -> &'static str;
}

impl<T: RequestValue> ObservableField for ObservableValue<T> {
    fn cell_id(&self) -> CellId {
        self.id()
    }

    fn bind_persistent(&self, store: &ValueStore, key: &str, owner: Owner) -> bool {
        self.bind_to_store(store, key, owner)
    }

    fn bind_temporary(&self, store: &ValueStore, key: &str, owner: Owner) -> bool {
        ObservableValue::bind_temporary(self, store, key, owner)
    }

    fn unbind(&self) -> bool {
        ObservableValue::unbind(self)
    }

    fn publish_current(&self) -> bool {
        ObservableValue::publish_current(self)
    }

    fn write_to(&self, store: &ValueStore, key: &str) {
        store.set(key, self.get());
    }

    fn bound_key(&self) -> Option<CompactString> {
        ObservableValue::bound_key(self)
    }

    fn value_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}
