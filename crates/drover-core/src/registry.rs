//! Thread-safe, alias-aware name registry.
//!
//! [`Registry<T>`] maps canonical names to values and keeps a separate
//! alias → canonical-name table. It backs the host plugin table, each
//! plugin's command table, and the SDK's in-process command tree.
//!
//! # Invariants
//!
//! - A canonical name never equals an existing canonical name or alias.
//! - An alias never equals an existing canonical name or alias.
//! - Removing an entry removes all of its aliases under the same write lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{RegistryError, RegistryResult};

struct Entries<T> {
    items: HashMap<String, T>,
    aliases: HashMap<String, String>,
}

impl<T> Entries<T> {
    fn canonical<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if self.items.contains_key(name) {
            return Some(name);
        }
        self.aliases.get(name).map(String::as_str)
    }

    /// Name of the entry that already owns `key`, as either name or alias.
    fn owner_of(&self, key: &str) -> Option<String> {
        if self.items.contains_key(key) {
            return Some(key.to_string());
        }
        self.aliases.get(key).cloned()
    }
}

/// A generic name → value store with alias resolution.
///
/// Reads (`get`, `resolve`, `names`, ...) take a shared lock and never
/// block one another; `register` and `remove` take the exclusive path.
pub struct Registry<T> {
    inner: RwLock<Entries<T>>,
}

impl<T> Registry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Entries {
                items: HashMap::new(),
                aliases: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries<T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `item` under `name` with the given aliases.
    ///
    /// Aliases equal to `name` and repeated aliases are ignored. The whole
    /// registration is rejected, leaving the registry untouched, if any
    /// name or alias collides with an existing entry.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::Duplicate`] if `name` is already a canonical name.
    /// - [`RegistryError::NameIsAlias`] if `name` is an existing alias.
    /// - [`RegistryError::AliasConflict`] if an alias is already taken.
    pub fn register<I, S>(&self, name: impl Into<String>, aliases: I, item: T) -> RegistryResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let mut wanted: Vec<String> = Vec::new();
        for alias in aliases {
            let alias = alias.into();
            if alias != name && !wanted.contains(&alias) {
                wanted.push(alias);
            }
        }

        let mut entries = self.write();
        if entries.items.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        if let Some(owner) = entries.aliases.get(&name) {
            return Err(RegistryError::NameIsAlias {
                owner: owner.clone(),
                name,
            });
        }
        for alias in &wanted {
            if let Some(existing) = entries.owner_of(alias) {
                return Err(RegistryError::AliasConflict {
                    alias: alias.clone(),
                    name,
                    existing,
                });
            }
        }

        for alias in wanted {
            entries.aliases.insert(alias, name.clone());
        }
        entries.items.insert(name, item);
        Ok(())
    }

    /// Resolve a name or alias to its canonical name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<String> {
        self.read().canonical(name).map(str::to_string)
    }

    /// Whether a name or alias resolves to an entry.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().canonical(name).is_some()
    }

    /// Run `f` against the entry a name or alias resolves to.
    ///
    /// The shared lock is held only for the duration of `f`.
    pub fn with<R>(&self, name: &str, f: impl FnOnce(&str, &T) -> R) -> Option<R> {
        let entries = self.read();
        let canonical = entries.canonical(name)?;
        entries.items.get(canonical).map(|item| f(canonical, item))
    }

    /// Remove an entry by name or alias, together with all of its aliases.
    ///
    /// Returns the canonical name and the removed value.
    pub fn remove(&self, name: &str) -> Option<(String, T)> {
        let mut entries = self.write();
        let canonical = entries.canonical(name)?.to_string();
        let item = entries.items.remove(&canonical)?;
        entries.aliases.retain(|_, owner| owner != &canonical);
        Some((canonical, item))
    }

    /// Remove every entry and alias, returning the values sorted by name.
    pub fn drain(&self) -> Vec<(String, T)> {
        let mut entries = self.write();
        entries.aliases.clear();
        let mut drained: Vec<(String, T)> = entries.items.drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        drained
    }

    /// Canonical names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().items.keys().cloned().collect();
        names.sort();
        names
    }

    /// Aliases registered for a canonical name, sorted.
    #[must_use]
    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        let entries = self.read();
        let mut aliases: Vec<String> = entries
            .aliases
            .iter()
            .filter(|(_, owner)| owner.as_str() == name)
            .map(|(alias, _)| alias.clone())
            .collect();
        aliases.sort();
        aliases
    }

    /// Number of canonical entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    /// Whether the registry has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().items.is_empty()
    }
}

impl<T: Clone> Registry<T> {
    /// Get a clone of the value a name or alias resolves to.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<T> {
        self.with(name, |_, item| item.clone())
    }

    /// Clones of all values, sorted by canonical name.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        let entries = self.read();
        let mut pairs: Vec<(&String, &T)> = entries.items.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs.into_iter().map(|(_, item)| item.clone()).collect()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.read();
        f.debug_struct("Registry")
            .field("len", &entries.items.len())
            .field("aliases", &entries.aliases.len())
            .finish()
    }
}
