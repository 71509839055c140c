//! The messaging context: one bus, two stores and the binder that connects
//! host objects to them.

use crate::binder::AttributeBinder;
use crate::bus::{EventBus, EventBusStats};
use crate::checker::{ConsistencyChecker, TypeRegistry};
use crate::config::MessagingConfig;
use crate::error::BindingError;
use crate::store::{StoreKind, ValueStore, ValueStoreStats};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Combined statistics of a context.
#[derive(Debug, Clone, Serialize)]
pub struct MessagingStats {
    pub events: EventBusStats,
    pub requests: ValueStoreStats,
    pub temp_requests: ValueStoreStats,
    pub active_objects: usize,
}

/// Owns every table of the messaging layer.
///
/// Created once by the host at startup and passed to whoever needs it.
#[derive(Debug)]
pub struct MessagingContext {
    config: MessagingConfig,
    events: EventBus,
    requests: ValueStore,
    temp_requests: ValueStore,
    binder: AttributeBinder,
    torn_down: AtomicBool,
}

impl MessagingContext {
    pub fn new(config: MessagingConfig) -> Self {
        let events = EventBus::with_settings(&config.events);
        let requests = ValueStore::with_settings(StoreKind::Persistent, &config.requests);
        let temp_requests = ValueStore::with_settings(StoreKind::Temporary, &config.requests);
        let binder = AttributeBinder::new(events.clone(), requests.clone(), temp_requests.clone());

        Self {
            config,
            events,
            requests,
            temp_requests,
            binder,
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The persistent request store.
    pub fn requests(&self) -> &ValueStore {
        &self.requests
    }

    /// The temporary request store.
    pub fn temp_requests(&self) -> &ValueStore {
        &self.temp_requests
    }

    pub fn binder(&self) -> &AttributeBinder {
        &self.binder
    }

    /// Runs the consistency checker if `consistency.check_on_startup` is
    /// set. Returns the errors found; an empty list when skipped.
    pub fn startup_check(&self, registry: &TypeRegistry) -> Vec<BindingError> {
        if !self.config.consistency.check_on_startup {
            debug!("Consistency check disabled");
            return Vec::new();
        }
        ConsistencyChecker::check(registry)
    }

    /// Signals a scope boundary (scene change). Only the temporary store
    /// reacts.
    pub fn on_scope_boundary(&self) {
        self.requests.on_scope_boundary();
        self.temp_requests.on_scope_boundary();
    }

    /// Clears every table. Only the first call does anything.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.events.clear();
        self.requests.clear();
        self.temp_requests.clear();
        self.binder.clear();
        info!("🛑 Messaging context torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> MessagingStats {
        MessagingStats {
            events: self.events.stats(),
            requests: self.requests.stats(),
            temp_requests: self.temp_requests.stats(),
            active_objects: self.binder.active_count(),
        }
    }
}

impl Default for MessagingContext {
    fn default() -> Self {
        Self::new(MessagingConfig::default())
    }
}
