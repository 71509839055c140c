use era_messaging::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// An owner without a release scope, so dead bindings are only removed by
/// dispatch-time pruning.
struct FlagOwner {
    alive: AtomicBool,
}

impl FlagOwner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(true),
        })
    }

    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl OwnerCapability for FlagOwner {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        self.is_alive()
    }
}

fn counting_handler(count: &Arc<AtomicUsize>) -> impl Fn() + Send + Sync + 'static {
    let count = count.clone();
    move || {
        count.fetch_add(1, Ordering::SeqCst);
    }
}

#[test_log::test]
fn subscribe_publish_round_trip() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));

    let id = bus.subscribe("X", detached_owner(), counting_handler(&count));
    bus.publish("X");
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let other = Arc::new(AtomicUsize::new(0));
    let id2 = bus.subscribe("Y", detached_owner(), counting_handler(&other));
    bus.unsubscribe("Y", id2);
    bus.publish("Y");
    assert_eq!(other.load(Ordering::SeqCst), 0);

    bus.unsubscribe("X", id);
}

#[test_log::test]
fn arity_isolation() {
    let bus = EventBus::new();
    let zero = Arc::new(AtomicUsize::new(0));
    let one = Arc::new(AtomicUsize::new(0));
    let one_count = one.clone();

    bus.subscribe("X", detached_owner(), counting_handler(&zero));
    bus.subscribe_with("X", detached_owner(), move |_: &String| {
        one_count.fetch_add(1, Ordering::SeqCst);
    });

    bus.publish("X");
    assert_eq!((zero.load(Ordering::SeqCst), one.load(Ordering::SeqCst)), (1, 0));

    bus.publish_with("X", &"arg".to_string());
    assert_eq!((zero.load(Ordering::SeqCst), one.load(Ordering::SeqCst)), (1, 1));
}

#[test_log::test]
fn equal_value_write_is_idempotent() {
    let store = ValueStore::new(StoreKind::Persistent);
    let cell = ObservableValue::new(5);
    cell.bind_to_store(&store, "K", detached_owner());

    let callbacks = Arc::new(AtomicUsize::new(0));
    let c = callbacks.clone();
    cell.on_change(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    let writes = store.stats().writes;

    assert!(!cell.set(5));
    assert_eq!(callbacks.load(Ordering::SeqCst), 0);
    assert_eq!(store.stats().writes, writes);

    assert!(cell.set(6));
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
    assert_eq!(store.stats().writes, writes + 1);
    assert_eq!(store.try_get::<i32>("K"), Ok(6));
}

#[test_log::test]
fn dead_owner_is_pruned_at_publish() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));
    let owners = [FlagOwner::new(), FlagOwner::new(), FlagOwner::new()];

    for owner in &owners {
        bus.subscribe("X", owner.clone(), counting_handler(&count));
    }
    owners[1].kill();

    assert_eq!(bus.publish("X"), 2);
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(bus.subscriber_count("X"), 2);

    assert_eq!(bus.publish("X"), 2);
    assert_eq!(count.load(Ordering::SeqCst), 4);
    assert_eq!(bus.stats().bindings_pruned, 1);
}

#[test_log::test]
fn destroyed_host_is_released_before_publish() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));
    let hosts = [HostObject::new("A"), HostObject::new("B"), HostObject::new("C")];

    for host in &hosts {
        bus.subscribe("X", host.owner(), counting_handler(&count));
    }
    hosts[1].destroy();
    assert_eq!(bus.subscriber_count("X"), 2);

    assert_eq!(bus.publish("X"), 2);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test_log::test]
fn bind_initializes_from_existing_value() {
    let store = ValueStore::new(StoreKind::Persistent);
    store.set("K", 5);

    let cell = ObservableValue::new(0);
    store.bind("K", detached_owner(), &cell);
    assert_eq!(cell.get(), 5);
}

#[test_log::test]
fn temporary_key_survives_scope_boundary() {
    let ctx = MessagingContext::default();
    let temp = ctx.temp_requests();

    temp.set_temporary("K", 7);
    temp.set("Other", 3);
    ctx.on_scope_boundary();

    assert_eq!(temp.try_get::<i32>("K"), Ok(7));
    assert!(temp.try_get::<i32>("Other").unwrap_err().is_not_found());
}

#[test_log::test]
fn reentrant_unsubscribe_during_publish() {
    let bus = EventBus::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let second_id: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));

    let inner_bus = bus.clone();
    let target = second_id.clone();
    let log = calls.clone();
    bus.subscribe("X", detached_owner(), move || {
        log.lock().unwrap().push(1);
        if let Some(id) = target.lock().unwrap().take() {
            inner_bus.unsubscribe("X", id);
        }
    });

    let log = calls.clone();
    let id = bus.subscribe("X", detached_owner(), move || log.lock().unwrap().push(2));
    *second_id.lock().unwrap() = Some(id);

    let log = calls.clone();
    bus.subscribe("X", detached_owner(), move || log.lock().unwrap().push(3));

    assert_eq!(bus.publish("X"), 2);
    assert_eq!(*calls.lock().unwrap(), vec![1, 3]);

    bus.publish("X");
    assert_eq!(*calls.lock().unwrap(), vec![1, 3, 1, 3]);
}

#[test_log::test]
fn reentrant_unbind_during_store_write() {
    let store = ValueStore::new(StoreKind::Persistent);
    let first = ObservableValue::new(0);
    let second = ObservableValue::new(0);
    first.bind_to_store(&store, "S", detached_owner());
    second.bind_to_store(&store, "S", detached_owner());

    let victim = second.clone();
    first.on_change(move |_| {
        victim.unbind();
    });

    store.set("S", 5);
    assert_eq!(first.get(), 5);
    assert_eq!(second.get(), 0);
    assert!(second.bound_key().is_none());
    assert_eq!(store.binding_count("S"), 1);
}

#[test_log::test]
fn flushed_key_can_be_bound_again() {
    let temp = ValueStore::new(StoreKind::Temporary);
    let cell = ObservableValue::new(0);
    assert!(cell.bind_temporary(&temp, "K", detached_owner()));

    temp.clear_temporary("K");
    temp.on_scope_boundary();
    assert!(cell.bound_key().is_none());

    assert!(cell.bind_temporary(&temp, "K", detached_owner()));
    temp.set("K", 9);
    assert_eq!(cell.get(), 9);

    cell.set(11);
    assert_eq!(temp.try_get::<i32>("K"), Ok(11));
}

#[test_log::test]
fn reentrant_publish_from_handler() {
    let bus = EventBus::new();
    let inner = Arc::new(AtomicUsize::new(0));
    let inner_bus = bus.clone();

    bus.subscribe("Outer", detached_owner(), move || {
        inner_bus.publish("Inner");
    });
    bus.subscribe("Inner", detached_owner(), counting_handler(&inner));

    bus.publish("Outer");
    assert_eq!(inner.load(Ordering::SeqCst), 1);
}

struct Enemy {
    host: HostObject,
    health: ObservableValue<f32>,
    attacks: Mutex<Vec<f32>>,
}

impl Enemy {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            host: HostObject::new("Enemy"),
            health: ObservableValue::new(100.0),
            attacks: Mutex::new(Vec::new()),
        })
    }

    fn take_damage(&self, amount: f32) {
        self.health.set(self.health.get() - amount);
    }

    fn attack(&self, a: f32, b: f32) {
        self.attacks.lock().unwrap().push(a + b);
    }
}

declare_bindings! {
    Enemy {
        event instance("Damage") => take_damage(f32);
        event scoped("Enemy", "Attack") => attack(f32, f32);
        request instance("Health") => health;
    }
}

impl Subscriber for Enemy {
    fn host(&self) -> &HostObject {
        &self.host
    }
}

#[test_log::test]
fn instance_scoped_names_are_private() {
    let ctx = MessagingContext::default();
    let a = Enemy::new();
    let b = Enemy::new();
    ctx.binder().activate(&a);
    ctx.binder().activate(&b);

    ctx.events().publish_with(&format!("{}.Damage", a.host.id()), &30.0f32);

    assert_eq!(a.health.get(), 70.0);
    assert_eq!(b.health.get(), 100.0);
    assert_eq!(
        ctx.requests().try_get::<f32>(&format!("{}.Health", a.host.id())),
        Ok(70.0)
    );
    assert_eq!(
        ctx.requests().try_get::<f32>(&format!("{}.Health", b.host.id())),
        Ok(100.0)
    );
}

#[test_log::test]
fn two_parameter_method_is_reported_and_others_still_bind() {
    let ctx = MessagingContext::default();
    let enemy = Enemy::new();

    let report = ctx.binder().on_transition(&enemy, LifecycleTransition::Activate);
    assert_eq!(
        report.errors,
        vec![BindingError::TooManyParameters {
            type_name: "Enemy",
            member: "attack",
            params: 2,
        }]
    );
    assert!(!ctx.events().has_subscribers("Enemy.Attack"));

    ctx.events().publish_with(&format!("{}.Damage", enemy.host.id()), &1.0f32);
    assert_eq!(enemy.health.get(), 99.0);
    assert!(enemy.attacks.lock().unwrap().is_empty());
}

#[test_log::test]
fn checker_reports_declarations_on_plain_types() {
    struct Loot {
        amount: ObservableValue<u32>,
    }

    declare_bindings! {
        Loot {
            request global("Loot") => amount;
        }
    }

    let mut registry = TypeRegistry::new();
    registry.register_subscriber::<Enemy>().register_declared::<Loot>();

    let ctx = MessagingContext::default();
    let errors = ctx.startup_check(&registry);
    assert_eq!(errors.len(), 2);
    assert!(errors.contains(&BindingError::NotSubscriber {
        type_name: "Loot",
        member: "amount",
        kind: MemberKind::Request,
    }));

    let json = serde_json::to_value(&registry).unwrap();
    assert_eq!(json["types"][0]["type_name"], "Enemy");
    assert_eq!(json["types"][1]["is_subscriber"], false);
}

#[test_log::test]
fn destroying_host_removes_all_bindings() {
    let ctx = MessagingContext::default();
    let enemy = Enemy::new();
    ctx.binder().activate(&enemy);
    assert_eq!(ctx.stats().active_objects, 1);

    enemy.host.destroy();
    let stats = ctx.stats();
    assert_eq!(stats.events.total_handlers, 0);
    assert_eq!(stats.requests.bindings, 0);
    assert_eq!(stats.active_objects, 0);
}

#[test_log::test]
fn teardown_clears_everything_once() {
    let ctx = MessagingContext::default();
    let enemy = Enemy::new();
    ctx.binder().activate(&enemy);
    ctx.temp_requests().set_temporary("Points", 5);

    ctx.teardown();
    ctx.teardown();

    let stats = ctx.stats();
    assert_eq!(stats.events.total_handlers, 0);
    assert_eq!(stats.requests.entries, 0);
    assert_eq!(stats.temp_requests.entries, 0);
    assert!(!ctx.temp_requests().is_temporary("Points"));

    let json = serde_json::to_string(&stats).unwrap();
    assert!(json.contains("\"active_objects\":0"));
}

#[test_log::test]
fn activation_cycles_keep_release_scope_bounded() {
    let ctx = MessagingContext::default();
    let enemy = Enemy::new();
    let scope = enemy.host.release_scope().unwrap();
    let damage = format!("{}.Damage", enemy.host.id());

    for _ in 0..1000 {
        ctx.binder().on_transition(&enemy, LifecycleTransition::Activate);
        ctx.binder().on_transition(&enemy, LifecycleTransition::Deactivate);
    }
    assert_eq!(scope.pending(), 0);
    assert_eq!(ctx.stats().events.total_handlers, 0);
    assert_eq!(ctx.stats().requests.bindings, 0);

    ctx.binder().activate(&enemy);
    assert_eq!(ctx.events().subscriber_count(&damage), 1);
    ctx.events().publish_with(&damage, &10.0f32);
    assert_eq!(enemy.health.get(), 90.0);

    enemy.host.destroy();
    assert_eq!(ctx.stats().events.total_handlers, 0);
    assert_eq!(ctx.stats().active_objects, 0);
}
