//! Error types for the messaging layer

use compact_str::CompactString;

/// Negative outcomes of reading a request value.
///
/// A missing key and a key holding a value of another type are distinct
/// results; callers can match on them instead of guessing from a default.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// No value has been stored under the key
    #[error("No request value stored for key '{0}'")]
    NotFound(CompactString),

    /// A value exists but was stored with a different type
    #[error("Request '{key}' holds a value of type '{found}', not '{expected}'")]
    TypeMismatch {
        key: CompactString,
        expected: &'static str,
        found: &'static str,
    },
}

impl RequestError {
    /// Returns true for the "key absent" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RequestError::NotFound(_))
    }

    /// Returns true for the "present but wrong type" outcome.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, RequestError::TypeMismatch { .. })
    }
}

/// The kind of member a binding declaration is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MemberKind {
    /// A method bound to an event
    Event,
    /// A field bound to the persistent request store
    Request,
    /// A field bound to the temporary request store
    TempRequest,
}

impl std::fmt::Display for MemberKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MemberKind::Event => "Event",
            MemberKind::Request => "Request",
            MemberKind::TempRequest => "TempRequest",
        };
        f.write_str(label)
    }
}

/// Configuration errors in binding declarations.
///
/// These are authoring mistakes. They are logged and the offending member
/// is skipped; execution continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// A declaration sits on a type that lacks the Subscriber capability
    #[error("The {type_name} type has the [{kind}('{member}')] declaration, but it is not a Subscriber")]
    NotSubscriber {
        type_name: &'static str,
        member: &'static str,
        kind: MemberKind,
    },

    /// An event method takes more than one parameter
    #[error("Event method {type_name}::{member} takes {params} parameters; at most one is supported")]
    TooManyParameters {
        type_name: &'static str,
        member: &'static str,
        params: usize,
    },
}

/// Errors raised by a lifecycle auto-release scope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// The scope already ran its release actions
    #[error("Release scope of {0} was already disposed")]
    AlreadyDisposed(String),
}

/// Errors raised while loading or writing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading or writing the configuration file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for the expected schema
    #[error("Configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML
    #[error("Configuration serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Umbrella error for the crate
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Request store error
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// Binding declaration error
    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),

    /// Lifecycle scope error
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Logging could not be initialized
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_kinds_are_distinct() {
        let missing = RequestError::NotFound("Points".into());
        let mismatch = RequestError::TypeMismatch {
            key: "Points".into(),
            expected: "i32",
            found: "alloc::string::String",
        };

        assert!(missing.is_not_found());
        assert!(!missing.is_type_mismatch());
        assert!(mismatch.is_type_mismatch());
        assert_ne!(missing, mismatch);
    }

    #[test]
    fn test_binding_error_messages() {
        let err = BindingError::NotSubscriber {
            type_name: "Points",
            member: "points",
            kind: MemberKind::Request,
        };
        assert_eq!(
            err.to_string(),
            "The Points type has the [Request('points')] declaration, but it is not a Subscriber"
        );

        let err = BindingError::TooManyParameters {
            type_name: "EnemyAttack",
            member: "attack",
            params: 2,
        };
        assert!(err.to_string().contains("takes 2 parameters"));
    }
}
