//! The demo scene: a player taking damage, points shared through the
//! request store, a group event and a temporary value crossing a scene
//! change.

use era_messaging::{
    declare_bindings, HostObject, LifecycleTransition, MessagingContext, MessagingStats, ObjectId,
    ObservableValue, Subscriber, TypeRegistry,
};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Scene knobs taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct SceneOptions {
    pub persist_points: bool,
}

/// Outcome of a scene run, printed as JSON by the binary.
#[derive(Debug, Clone, Serialize)]
pub struct SceneSummary {
    pub player_health: i32,
    pub points: i32,
    pub messages_printed: usize,
    pub points_reports: Vec<i32>,
    pub temp_points_after_boundary: Option<i32>,
    pub damage_handlers_after_player_destroyed: usize,
    pub binding_errors: usize,
    pub stats: MessagingStats,
}

pub struct PlayerHealth {
    host: HostObject,
    max_health: i32,
    health: ObservableValue<i32>,
}

impl PlayerHealth {
    pub fn new(max_health: i32) -> Arc<Self> {
        Arc::new(Self {
            host: HostObject::new("Player"),
            max_health,
            health: ObservableValue::new(max_health),
        })
    }

    fn apply_damage(&self, damage: i32) {
        let health = (self.health.get() - damage).clamp(0, self.max_health);
        self.health.set(health);
        info!("❤️ Player health: {}", health);
    }

    pub fn health(&self) -> i32 {
        self.health.get()
    }
}

declare_bindings! {
    PlayerHealth {
        event instance("ApplyDamage") => apply_damage(i32);
        request instance("Health") => health;
    }
}

impl Subscriber for PlayerHealth {
    fn host(&self) -> &HostObject {
        &self.host
    }
}

/// Publishes damage at whatever it hits. Holds no bindings.
pub struct EnemyAttack {
    damage: i32,
}

impl EnemyAttack {
    pub fn new(damage: i32) -> Self {
        Self { damage }
    }

    pub fn hit(&self, ctx: &MessagingContext, target: ObjectId) -> usize {
        ctx.events()
            .publish_with(&format!("{}.ApplyDamage", target), &self.damage)
    }
}

/// Owns the shared "Points" value and reacts to both forms of
/// "ChangePoints".
pub struct PointsData {
    host: HostObject,
    points: ObservableValue<i32>,
    seed: Mutex<u32>,
    reports: Mutex<Vec<i32>>,
}

impl PointsData {
    pub fn new(seed: u32) -> Arc<Self> {
        Arc::new(Self {
            host: HostObject::new("PointsData"),
            points: ObservableValue::new(0),
            seed: Mutex::new(seed),
            reports: Mutex::new(Vec::new()),
        })
    }

    fn next_roll(&self) -> i32 {
        let mut seed = self.seed.lock().unwrap_or_else(|e| e.into_inner());
        *seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        ((*seed >> 16) % 1001) as i32
    }

    fn reroll(&self) {
        let value = self.next_roll();
        self.points.set(value);
        info!("🎲 New points value: {}", value);
    }

    fn report(&self, value: i32) {
        info!("📣 ChangePoints({})", value);
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(value);
    }

    pub fn reports(&self) -> Vec<i32> {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

declare_bindings! {
    PointsData {
        event global("ChangePoints") => reroll();
        event global("ChangePoints") => report(i32);
        request global("Points") => points;
    }
}

impl Subscriber for PointsData {
    fn host(&self) -> &HostObject {
        &self.host
    }
}

/// One member of the "PrintMessage" group.
pub struct PointTest {
    host: HostObject,
    message: String,
    printed: Arc<AtomicUsize>,
}

impl PointTest {
    pub fn new(message: &str, printed: Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(Self {
            host: HostObject::new("PointTest"),
            message: message.to_string(),
            printed,
        })
    }

    fn print_message(&self) {
        info!("💬 {}", self.message);
        self.printed.fetch_add(1, Ordering::SeqCst);
    }
}

declare_bindings! {
    PointTest {
        event global("PrintMessage") => print_message();
    }
}

impl Subscriber for PointTest {
    fn host(&self) -> &HostObject {
        &self.host
    }
}

/// Short-lived object holding a temporary view of "Points".
pub struct TempData {
    host: HostObject,
    points: ObservableValue<i32>,
}

impl TempData {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            host: HostObject::new("TempData"),
            points: ObservableValue::new(0),
        })
    }

    pub fn set_points(&self, value: i32) {
        self.points.set(value);
    }
}

declare_bindings! {
    TempData {
        temp_request global("Points") => points;
    }
}

impl Subscriber for TempData {
    fn host(&self) -> &HostObject {
        &self.host
    }
}

/// Every type the scene binds, for the startup check.
pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry
        .register_subscriber::<PlayerHealth>()
        .register_subscriber::<PointsData>()
        .register_subscriber::<PointTest>()
        .register_subscriber::<TempData>();
    registry
}

/// Runs the scripted scene against `ctx` and tears the context down.
pub fn run_scene(ctx: &MessagingContext, options: &SceneOptions) -> SceneSummary {
    let binding_errors = ctx.startup_check(&registry()).len();
    let binder = ctx.binder();

    let player = PlayerHealth::new(100);
    let points_data = PointsData::new(7);
    let printed = Arc::new(AtomicUsize::new(0));
    let group = [
        PointTest::new("Hello from the first listener", printed.clone()),
        PointTest::new("Hello from the second listener", printed.clone()),
    ];
    let temp_data = TempData::new();

    binder.on_transition(&player, LifecycleTransition::Activate);
    binder.on_transition(&points_data, LifecycleTransition::Activate);
    for member in &group {
        binder.on_transition(member, LifecycleTransition::Activate);
    }
    binder.on_transition(&temp_data, LifecycleTransition::Activate);

    let enemy = EnemyAttack::new(30);
    for _ in 0..4 {
        enemy.hit(ctx, player.host.id());
    }

    ctx.events().publish("PrintMessage");

    ctx.events().publish("ChangePoints");
    ctx.events().publish_with("ChangePoints", &50);
    let points = ctx.requests().get_or_default::<i32>("Points");
    info!("Get points value: {}", points);

    temp_data.set_points(points);
    info!("The temporary object has been deleted");
    temp_data.host.destroy();
    if !options.persist_points {
        ctx.temp_requests().clear_temporary("Points");
    }
    ctx.on_scope_boundary();
    let temp_points_after_boundary = ctx.temp_requests().try_get::<i32>("Points").ok();

    let player_health = player.health();
    player.host.destroy();
    let damage_handlers_after_player_destroyed = enemy.hit(ctx, player.host.id());

    let stats = ctx.stats();
    ctx.teardown();

    SceneSummary {
        player_health,
        points,
        messages_printed: printed.load(Ordering::SeqCst),
        points_reports: points_data.reports(),
        temp_points_after_boundary,
        damage_handlers_after_player_destroyed,
        binding_errors,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_without_persisted_points() {
        let ctx = MessagingContext::default();
        let summary = run_scene(&ctx, &SceneOptions::default());

        assert_eq!(summary.player_health, 0);
        assert_eq!(summary.messages_printed, 2);
        assert_eq!(summary.points_reports, vec![50]);
        assert!((0..=1000).contains(&summary.points));
        assert_eq!(summary.temp_points_after_boundary, None);
        assert_eq!(summary.damage_handlers_after_player_destroyed, 0);
        assert_eq!(summary.binding_errors, 0);
        assert!(ctx.is_torn_down());
    }

    #[test]
    fn test_scene_with_persisted_points() {
        let ctx = MessagingContext::default();
        let summary = run_scene(&ctx, &SceneOptions { persist_points: true });
        assert_eq!(summary.temp_points_after_boundary, Some(summary.points));
    }

    #[test]
    fn test_player_takes_clamped_damage() {
        let ctx = MessagingContext::default();
        let player = PlayerHealth::new(50);
        ctx.binder().activate(&player);

        let enemy = EnemyAttack::new(20);
        assert_eq!(enemy.hit(&ctx, player.host.id()), 1);
        assert_eq!(player.health(), 30);
        enemy.hit(&ctx, player.host.id());
        enemy.hit(&ctx, player.host.id());
        assert_eq!(player.health(), 0);

        let key = format!("{}.Health", player.host.id());
        assert_eq!(ctx.requests().try_get::<i32>(&key), Ok(0));
    }

    #[test]
    fn test_other_players_are_not_hit() {
        let ctx = MessagingContext::default();
        let a = PlayerHealth::new(100);
        let b = PlayerHealth::new(100);
        ctx.binder().activate(&a);
        ctx.binder().activate(&b);

        EnemyAttack::new(10).hit(&ctx, a.host.id());
        assert_eq!((a.health(), b.health()), (90, 100));
    }
}
