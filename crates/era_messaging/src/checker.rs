//! Startup consistency checks over registered declaration tables.

use crate::binder::{DeclaresBindings, Subscriber, TypeBindings};
use crate::error::{BindingError, MemberKind};
use crate::types::BindingDecl;
use serde::Serialize;
use tracing::{error, info};

/// An event method as seen by the checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub member: &'static str,
    pub arity: usize,
    pub decls: Vec<BindingDecl>,
}

/// A request field as seen by the checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSummary {
    pub member: &'static str,
    pub kind: MemberKind,
    pub decls: Vec<BindingDecl>,
}

/// Metadata of one registered type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeSummary {
    pub type_name: &'static str,
    pub is_subscriber: bool,
    pub events: Vec<EventSummary>,
    pub requests: Vec<RequestSummary>,
}

impl TypeSummary {
    fn from_table<S>(table: &TypeBindings<S>, is_subscriber: bool) -> Self {
        Self {
            type_name: table.type_name,
            is_subscriber,
            events: table
                .events
                .iter()
                .map(|event| EventSummary {
                    member: event.member,
                    arity: event.invoker.arity(),
                    decls: event.decls.clone(),
                })
                .collect(),
            requests: table
                .fields
                .iter()
                .map(|field| RequestSummary {
                    member: field.member,
                    kind: field.kind(),
                    decls: field.decls.clone(),
                })
                .collect(),
        }
    }

    /// Event methods the binder will refuse to subscribe.
    pub fn unsupported_events(&self) -> impl Iterator<Item = &EventSummary> {
        self.events.iter().filter(|event| event.arity > 1)
    }
}

/// The set of types known to carry binding declarations.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TypeRegistry {
    types: Vec<TypeSummary>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type the binder can drive.
    pub fn register_subscriber<S: Subscriber>(&mut self) -> &mut Self {
        self.insert(TypeSummary::from_table(&S::bindings(), true))
    }

    /// Registers a type that carries declarations but is not a subscriber.
    pub fn register_declared<T: DeclaresBindings>(&mut self) -> &mut Self {
        self.insert(TypeSummary::from_table(&T::bindings(), false))
    }

    fn insert(&mut self, summary: TypeSummary) -> &mut Self {
        match self.types.iter_mut().find(|t| t.type_name == summary.type_name) {
            Some(existing) => *existing = summary,
            None => self.types.push(summary),
        }
        self
    }

    pub fn types(&self) -> &[TypeSummary] {
        &self.types
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeSummary> {
        self.types.iter().find(|t| t.type_name == type_name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Reports misplaced declarations and unsupported event signatures.
pub struct ConsistencyChecker;

impl ConsistencyChecker {
    /// Checks every registered type, logging each error found.
    pub fn check(registry: &TypeRegistry) -> Vec<BindingError> {
        let mut errors = Vec::new();

        for summary in registry.types() {
            if !summary.is_subscriber {
                for event in &summary.events {
                    errors.push(BindingError::NotSubscriber {
                        type_name: summary.type_name,
                        member: event.member,
                        kind: MemberKind::Event,
                    });
                }
                for request in &summary.requests {
                    errors.push(BindingError::NotSubscriber {
                        type_name: summary.type_name,
                        member: request.member,
                        kind: request.kind,
                    });
                }
            }

            for event in summary.unsupported_events() {
                errors.push(BindingError::TooManyParameters {
                    type_name: summary.type_name,
                    member: event.member,
                    params: event.arity,
                });
            }
        }

        for err in &errors {
            error!("❌ {}", err);
        }
        if errors.is_empty() {
            info!("✅ Binding declarations consistent across {} type(s)", registry.len());
        }
        errors
    }

    /// Same as [`check`](Self::check) for a single table.
    pub fn check_table<S>(table: &TypeBindings<S>, is_subscriber: bool) -> Vec<BindingError> {
        let mut registry = TypeRegistry::new();
        registry.insert(TypeSummary::from_table(table, is_subscriber));
        Self::check(&registry)
    }
}
