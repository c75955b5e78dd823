//! Error types shared by host and SDK.

/// Errors from [`Registry`](crate::Registry) mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// An entry with this canonical name already exists.
    #[error("'{0}' is already registered")]
    Duplicate(String),

    /// The canonical name is already taken as an alias of another entry.
    #[error("'{name}' is already an alias of '{owner}'")]
    NameIsAlias {
        /// The rejected canonical name.
        name: String,
        /// The entry that owns the alias.
        owner: String,
    },

    /// An alias collides with an existing canonical name or alias.
    #[error("alias '{alias}' of '{name}' collides with existing entry '{existing}'")]
    AliasConflict {
        /// The rejected alias.
        alias: String,
        /// The entry being registered.
        name: String,
        /// The entry that already owns the name or alias.
        existing: String,
    },
}

/// A plugin name or alias that breaks the naming rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid plugin name '{name}': {reason}")]
pub struct InvalidName {
    /// The offending name.
    pub name: String,
    /// Which rule it breaks.
    pub reason: &'static str,
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
