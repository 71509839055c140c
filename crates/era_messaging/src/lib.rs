//! # ERA Messaging
//!
//! Decoupled publish/subscribe and shared-state messaging for a
//! component-based runtime. Host objects broadcast named events and read or
//! write named values ("requests") without holding references to each
//! other.
//!
//! ## Architecture
//!
//! - **EventBus**: name-keyed handlers, one table for zero-argument events
//!   and one for one-argument events
//! - **ValueStore**: keyed type-erased values pushed into bound cells; a
//!   persistent and a temporary instance
//! - **ObservableValue**: change-notifying cell that mirrors itself into a
//!   store key
//! - **AutoRelease**: per-host-object release scope, disposed once when the
//!   object is destroyed
//! - **AttributeBinder**: applies a type's declaration table on activation
//!   and deactivation
//! - **ConsistencyChecker**: startup check over registered declaration
//!   tables
//! - **MessagingContext**: owns all of the above
//!
//! ## Usage
//!
//! ```rust
//! use era_messaging::*;
//! use std::sync::Arc;
//!
//! struct Points {
//!     host: HostObject,
//!     value: ObservableValue<i32>,
//! }
//!
//! impl Points {
//!     fn add(&self, amount: i32) {
//!         self.value.set(self.value.get() + amount);
//!     }
//! }
//!
//! declare_bindings! {
//!     Points {
//!         event global("ChangePoints") => add(i32);
//!         request global("Points") => value;
//!     }
//! }
//!
//! impl Subscriber for Points {
//!     fn host(&self) -> &HostObject {
//!         &self.host
//!     }
//! }
//!
//! let ctx = MessagingContext::default();
//! let points = Arc::new(Points {
//!     host: HostObject::new("Points"),
//!     value: ObservableValue::new(0),
//! });
//!
//! ctx.binder().on_transition(&points, LifecycleTransition::Activate);
//! ctx.events().publish_with("ChangePoints", &50);
//! assert_eq!(ctx.requests().try_get::<i32>("Points"), Ok(50));
//! ```

pub mod binder;
pub mod bus;
pub mod checker;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod macros;
pub mod observable;
pub mod owner;
pub mod store;
pub mod types;
pub mod utils;

pub use binder::{
    AttributeBinder, BindingReport, DeclaresBindings, EventMember, FieldMember, LifecycleTransition,
    MethodInvoker, Subscriber, TypeBindings,
};
pub use bus::{EventBus, EventBusStats};
pub use checker::{ConsistencyChecker, EventSummary, RequestSummary, TypeRegistry, TypeSummary};
pub use config::{
    ConsistencySettings, EventSettings, LoggingSettings, MessagingConfig, RequestSettings,
};
pub use context::{MessagingContext, MessagingStats};
pub use error::{BindingError, ConfigError, LifecycleError, MemberKind, MessagingError, RequestError};
pub use lifecycle::{AutoRelease, ReleaseAction, ReleaseKey};
pub use logging::setup_logging;
pub use observable::{ObservableField, ObservableValue};
pub use owner::{detached_owner, HostObject, Owner, OwnerCapability};
pub use store::{RequestValue, StoreKind, ValueStore, ValueStoreStats};
pub use types::{BindingDecl, BindingMode, CellId, HandlerId, ObjectId};

/// Result type for messaging operations
pub type Result<T> = std::result::Result<T, MessagingError>;
