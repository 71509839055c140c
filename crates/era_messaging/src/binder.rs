//! Declarative binding of host objects to the bus and the stores.
//!
//! A type lists its event methods and request fields in a [`TypeBindings`]
//! table, usually through [`declare_bindings!`](crate::declare_bindings).
//! The [`AttributeBinder`] walks that table on lifecycle transitions:
//! activation subscribes and binds everything, deactivation undoes it.

use crate::bus::EventBus;
use crate::error::{BindingError, MemberKind};
use crate::lifecycle::ReleaseKey;
use crate::observable::ObservableField;
use crate::owner::{HostObject, Owner};
use crate::store::ValueStore;
use crate::types::{BindingDecl, HandlerId, ObjectId};
use compact_str::CompactString;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

/// How an event method is invoked, derived from its declared signature.
pub enum MethodInvoker<S> {
    /// `fn(&self)`
    NoArg(fn(&S)),
    /// `fn(&self, P)`; `subscribe` registers a typed one-argument handler
    /// that upgrades the weak target before calling the method
    OneArg {
        param_type: &'static str,
        subscribe: fn(&EventBus, &str, Owner, Weak<S>) -> HandlerId,
    },
    /// More than one parameter; never subscribed
    Unsupported { params: &'static [&'static str] },
}

impl<S> MethodInvoker<S> {
    /// Number of parameters of the declared method.
    pub fn arity(&self) -> usize {
        match self {
            MethodInvoker::NoArg(_) => 0,
            MethodInvoker::OneArg { .. } => 1,
            MethodInvoker::Unsupported { params } => params.len(),
        }
    }
}

/// A method carrying one or more event declarations.
pub struct EventMember<S> {
    pub member: &'static str,
    pub decls: Vec<BindingDecl>,
    pub invoker: MethodInvoker<S>,
}

/// A field carrying one or more request declarations.
pub struct FieldMember<S> {
    pub member: &'static str,
    pub decls: Vec<BindingDecl>,
    /// Bound to the temporary store instead of the persistent one
    pub temporary: bool,
    pub access: fn(&S) -> &dyn ObservableField,
}

impl<S> FieldMember<S> {
    pub fn kind(&self) -> MemberKind {
        if self.temporary {
            MemberKind::TempRequest
        } else {
            MemberKind::Request
        }
    }
}

/// The declaration table of a type.
pub struct TypeBindings<S> {
    pub type_name: &'static str,
    pub events: Vec<EventMember<S>>,
    pub fields: Vec<FieldMember<S>>,
}

impl<S> TypeBindings<S> {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            events: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Adds an event declaration. Repeated declarations on the same
    /// method accumulate.
    pub fn event(&mut self, member: &'static str, decl: BindingDecl, invoker: MethodInvoker<S>) -> &mut Self {
        match self.events.iter_mut().find(|event| event.member == member) {
            Some(event) => event.decls.push(decl),
            None => self.events.push(EventMember {
                member,
                decls: vec![decl],
                invoker,
            }),
        }
        self
    }

    /// Adds a persistent request declaration.
    pub fn request(&mut self, member: &'static str, decl: BindingDecl, access: fn(&S) -> &dyn ObservableField) -> &mut Self {
        self.field(member, decl, false, access)
    }

    /// Adds a temporary request declaration.
    pub fn temp_request(&mut self, member: &'static str, decl: BindingDecl, access: fn(&S) -> &dyn ObservableField) -> &mut Self {
        self.field(member, decl, true, access)
    }

    fn field(&mut self, member: &'static str, decl: BindingDecl, temporary: bool, access: fn(&S) -> &dyn ObservableField) -> &mut Self {
        match self.fields.iter_mut().find(|field| field.member == member) {
            Some(field) => field.decls.push(decl),
            None => self.fields.push(FieldMember {
                member,
                decls: vec![decl],
                temporary,
                access,
            }),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.fields.is_empty()
    }
}

/// A type that carries binding declarations.
pub trait DeclaresBindings: Sized + Send + Sync + 'static {
    fn bindings() -> TypeBindings<Self>;
}

/// A host-object component the binder may drive.
pub trait Subscriber: DeclaresBindings {
    fn host(&self) -> &HostObject;
}

/// Host lifecycle transitions the binder reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleTransition {
    Activate,
    Deactivate,
    /// An inspector edited the object; push request values again
    ValidateInEditor,
}

/// What a transition did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BindingReport {
    /// Resolved event names that received a handler (or lost one)
    pub subscribed: Vec<CompactString>,
    /// Resolved keys of request fields bound, unbound or republished
    pub bound: Vec<CompactString>,
    /// Declaration errors found on the way
    pub errors: Vec<BindingError>,
}

impl BindingReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Default)]
struct ActiveRecord {
    handlers: Vec<(CompactString, HandlerId)>,
    fields: Vec<CompactString>,
    /// Forgets this record when the host dies
    release: Option<ReleaseKey>,
}

/// Applies declaration tables to the bus and the stores.
#[derive(Clone)]
pub struct AttributeBinder {
    events: EventBus,
    requests: ValueStore,
    temp_requests: ValueStore,
    active: Arc<DashMap<ObjectId, ActiveRecord>>,
}

impl AttributeBinder {
    pub fn new(events: EventBus, requests: ValueStore, temp_requests: ValueStore) -> Self {
        Self {
            events,
            requests,
            temp_requests,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Handles a lifecycle transition of `target`.
    pub fn on_transition<S: Subscriber>(&self, target: &Arc<S>, transition: LifecycleTransition) -> BindingReport {
        match transition {
            LifecycleTransition::Activate => self.activate(target),
            LifecycleTransition::Deactivate => self.deactivate(target),
            LifecycleTransition::ValidateInEditor => self.validate(target),
        }
    }

    /// Subscribes every event method and binds every request field of
    /// `target`. Activating an already active object does nothing.
    pub fn activate<S: Subscriber>(&self, target: &Arc<S>) -> BindingReport {
        let host = target.host();
        let id = host.id();
        let mut report = BindingReport::default();

        if self.active.contains_key(&id) {
            trace!("{} already active; activation ignored", host.name());
            return report;
        }
        if !host.is_alive() {
            warn!("⚠️ Cannot activate destroyed object {}", host.name());
            return report;
        }

        let table = S::bindings();
        let owner = host.owner();
        let weak = Arc::downgrade(target);
        let mut record = ActiveRecord::default();

        for event in &table.events {
            if let MethodInvoker::Unsupported { params } = &event.invoker {
                let err = BindingError::TooManyParameters {
                    type_name: table.type_name,
                    member: event.member,
                    params: params.len(),
                };
                error!("❌ {}", err);
                report.errors.push(err);
                continue;
            }

            for decl in &event.decls {
                let name = decl.resolve(id);
                let handler = match &event.invoker {
                    MethodInvoker::NoArg(invoke) => {
                        let invoke = *invoke;
                        let target = weak.clone();
                        self.events.subscribe(&name, owner.clone(), move || {
                            if let Some(target) = target.upgrade() {
                                invoke(&target);
                            }
                        })
                    }
                    MethodInvoker::OneArg { subscribe, .. } => {
                        subscribe(&self.events, &name, owner.clone(), weak.clone())
                    }
                    MethodInvoker::Unsupported { .. } => continue,
                };
                report.subscribed.push(name.clone());
                record.handlers.push((name, handler));
            }
        }

        for field in &table.fields {
            let Some((decl, extra)) = field.decls.split_first() else {
                continue;
            };
            if !extra.is_empty() {
                warn!(
                    "⚠️ {}::{} has {} request declarations; only '{}' is bound",
                    table.type_name,
                    field.member,
                    field.decls.len(),
                    decl
                );
            }

            let key = decl.resolve(id);
            let cell = (field.access)(target);
            let bound = if field.temporary {
                cell.bind_temporary(&self.temp_requests, &key, owner.clone())
            } else {
                cell.bind_persistent(&self.requests, &key, owner.clone())
            };
            if bound {
                report.bound.push(key.clone());
                record.fields.push(key);
            } else {
                debug!("{}::{} was already bound", table.type_name, field.member);
            }
        }

        if let Some(scope) = host.release_scope() {
            let active = Arc::downgrade(&self.active);
            let registered = scope.register(move || {
                if let Some(active) = active.upgrade() {
                    active.remove(&id);
                }
            });
            match registered {
                Ok(release) => record.release = Some(release),
                Err(e) => debug!("Activation record of {} not tied to its lifetime: {}", id, e),
            }
        }

        debug!(
            "✅ Activated {}: {} handler(s), {} field(s)",
            host.name(),
            record.handlers.len(),
            record.fields.len()
        );
        self.active.insert(id, record);
        report
    }

    /// Unsubscribes and unbinds everything the last activation of `target`
    /// registered. Inactive objects are ignored.
    pub fn deactivate<S: Subscriber>(&self, target: &Arc<S>) -> BindingReport {
        let host = target.host();
        let mut report = BindingReport::default();

        let Some((_, record)) = self.active.remove(&host.id()) else {
            trace!("{} not active; deactivation ignored", host.name());
            return report;
        };

        for (name, handler) in record.handlers {
            self.events.unsubscribe(&name, handler);
            report.subscribed.push(name);
        }

        let table = S::bindings();
        for field in &table.fields {
            (field.access)(target).unbind();
        }
        report.bound = record.fields;

        if let Some(release) = record.release {
            if let Some(scope) = host.release_scope() {
                scope.unregister(release);
            }
        }

        debug!("⏸️ Deactivated {}", host.name());
        report
    }

    /// Writes the current value of every request field to the key its
    /// first declaration resolves to, whether or not `target` is active.
    /// Subscriptions are not touched.
    pub fn validate<S: Subscriber>(&self, target: &Arc<S>) -> BindingReport {
        let mut report = BindingReport::default();
        let table = S::bindings();
        let id = target.host().id();

        for field in &table.fields {
            let Some(decl) = field.decls.first() else {
                continue;
            };
            let key = decl.resolve(id);
            let store = if field.temporary {
                &self.temp_requests
            } else {
                &self.requests
            };
            (field.access)(target).write_to(store, &key);
            report.bound.push(key);
        }

        trace!("Validated {}: republished {} field(s)", target.host().name(), report.bound.len());
        report
    }

    pub fn is_active(&self, id: ObjectId) -> bool {
        self.active.contains_key(&id)
    }

    /// Number of objects currently active.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Forgets every activation record. Bus and store tables are cleared
    /// separately.
    pub fn clear(&self) {
        self.active.clear();
    }
}

impl std::fmt::Debug for AttributeBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeBinder")
            .field("active", &self.active.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::ObservableValue;
    use crate::store::StoreKind;
    use std::sync::Mutex;

    struct Turret {
        host: HostObject,
        fired: Mutex<u32>,
        aimed: Mutex<Vec<f32>>,
        ammo: ObservableValue<i32>,
        targets: ObservableValue<String>,
    }

    impl Turret {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                host: HostObject::new("Turret"),
                fired: Mutex::new(0),
                aimed: Mutex::new(Vec::new()),
                ammo: ObservableValue::new(10),
                targets: ObservableValue::new(String::new()),
            })
        }

        fn fire(&self) {
            *self.fired.lock().unwrap() += 1;
        }

        fn aim(&self, angle: f32) {
            self.aimed.lock().unwrap().push(angle);
        }

        fn calibrate(&self, _x: f32, _y: f32) {}
    }

    crate::declare_bindings! {
        Turret {
            event global("Fire") => fire();
            event scoped("Turret", "Fire") => fire();
            event instance("Aim") => aim(f32);
            event global("Calibrate") => calibrate(f32, f32);
            request instance("Ammo") => ammo;
            temp_request global("Targets") => targets;
        }
    }

    impl Subscriber for Turret {
        fn host(&self) -> &HostObject {
            &self.host
        }
    }

    fn binder() -> (AttributeBinder, EventBus, ValueStore, ValueStore) {
        let bus = EventBus::new();
        let requests = ValueStore::new(StoreKind::Persistent);
        let temp = ValueStore::new(StoreKind::Temporary);
        (
            AttributeBinder::new(bus.clone(), requests.clone(), temp.clone()),
            bus,
            requests,
            temp,
        )
    }

    #[test]
    fn test_declaration_table() {
        let table = Turret::bindings();
        assert_eq!(table.type_name, "Turret");
        assert_eq!(table.events.len(), 3);
        assert_eq!(table.events[0].decls.len(), 2);
        assert_eq!(table.events[1].invoker.arity(), 1);
        assert_eq!(table.events[2].invoker.arity(), 2);
        assert_eq!(table.fields[0].kind(), MemberKind::Request);
        assert_eq!(table.fields[1].kind(), MemberKind::TempRequest);
    }

    #[test]
    fn test_activate_subscribes_and_binds() {
        let (binder, bus, requests, temp) = binder();
        let turret = Turret::new();
        let id = turret.host.id();

        let report = binder.on_transition(&turret, LifecycleTransition::Activate);
        assert_eq!(report.subscribed.len(), 3);
        assert_eq!(report.bound.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            report.errors[0],
            BindingError::TooManyParameters { member: "calibrate", params: 2, .. }
        ));

        bus.publish("Fire");
        bus.publish("Turret.Fire");
        assert_eq!(*turret.fired.lock().unwrap(), 2);

        bus.publish_with(&format!("{}.Aim", id), &45.0f32);
        assert_eq!(*turret.aimed.lock().unwrap(), vec![45.0]);

        assert_eq!(requests.try_get::<i32>(&format!("{}.Ammo", id)), Ok(10));
        assert!(temp.is_temporary("Targets"));
        assert!(binder.is_active(id));
    }

    #[test]
    fn test_activate_twice_is_noop() {
        let (binder, bus, _, _) = binder();
        let turret = Turret::new();

        binder.activate(&turret);
        let second = binder.activate(&turret);
        assert!(second.subscribed.is_empty());
        assert_eq!(bus.subscriber_count("Fire"), 1);
    }

    #[test]
    fn test_deactivate_unwinds_everything() {
        let (binder, bus, requests, _) = binder();
        let turret = Turret::new();
        binder.activate(&turret);

        let report = binder.on_transition(&turret, LifecycleTransition::Deactivate);
        assert_eq!(report.subscribed.len(), 3);
        assert_eq!(bus.stats().total_handlers, 0);
        assert!(turret.ammo.bound_key().is_none());
        assert_eq!(requests.stats().bindings, 0);
        assert!(!binder.is_active(turret.host.id()));

        assert_eq!(bus.publish("Fire"), 0);
        assert!(binder.deactivate(&turret).subscribed.is_empty());
    }

    #[test]
    fn test_validate_republishes_edited_fields() {
        let (binder, _, requests, _) = binder();
        let turret = Turret::new();
        binder.activate(&turret);
        let key = format!("{}.Ammo", turret.host.id());

        turret.ammo.set_without_notify(3);
        assert_eq!(requests.try_get::<i32>(&key), Ok(10));

        let report = binder.on_transition(&turret, LifecycleTransition::ValidateInEditor);
        assert_eq!(report.bound.len(), 2);
        assert_eq!(requests.try_get::<i32>(&key), Ok(3));
    }

    #[test]
    fn test_validate_reaches_store_while_inactive() {
        let (binder, _, requests, temp) = binder();
        let turret = Turret::new();
        let key = format!("{}.Ammo", turret.host.id());

        turret.ammo.set_without_notify(7);
        let report = binder.validate(&turret);
        assert_eq!(report.bound.len(), 2);
        assert_eq!(requests.try_get::<i32>(&key), Ok(7));
        assert_eq!(temp.try_get::<String>("Targets").unwrap(), "");
        assert!(turret.ammo.bound_key().is_none());
    }

    #[test]
    fn test_activation_cycles_do_not_accumulate() {
        let (binder, bus, requests, _) = binder();
        let turret = Turret::new();
        let scope = turret.host.release_scope().unwrap();

        binder.activate(&turret);
        let pending_while_active = scope.pending();
        assert!(pending_while_active > 0);
        binder.deactivate(&turret);
        assert_eq!(scope.pending(), 0);

        for _ in 0..100 {
            binder.activate(&turret);
            assert_eq!(scope.pending(), pending_while_active);
            binder.deactivate(&turret);
        }
        assert_eq!(scope.pending(), 0);

        binder.activate(&turret);
        assert_eq!(bus.subscriber_count("Fire"), 1);
        assert_eq!(requests.binding_count(&format!("{}.Ammo", turret.host.id())), 1);
        bus.publish("Fire");
        assert_eq!(*turret.fired.lock().unwrap(), 1);
    }

    #[test]
    fn test_destroying_host_releases_bindings() {
        let (binder, bus, requests, _) = binder();
        let turret = Turret::new();
        binder.activate(&turret);

        turret.host.destroy();
        assert_eq!(bus.stats().total_handlers, 0);
        assert_eq!(requests.stats().bindings, 0);
        assert_eq!(binder.active_count(), 0);
    }

    #[test]
    fn test_destroyed_host_cannot_activate() {
        let (binder, bus, _, _) = binder();
        let turret = Turret::new();
        turret.host.destroy();

        let report = binder.activate(&turret);
        assert!(report.subscribed.is_empty());
        assert_eq!(bus.stats().total_handlers, 0);
    }
}
