//! Process-wide cache of built scope commands.

use crate::command::DbCommand;
use crate::error::ProviderResult;
use crate::scope::{ScopeCommandType, ScopeType};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

static GLOBAL_CACHE: Lazy<Arc<CommandCache>> = Lazy::new(|| Arc::new(CommandCache::new()));

/// Identity of a cached command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Connection data source.
    pub data_source: String,
    /// Connection database.
    pub database: String,
    /// Scope-info table name.
    pub scope_table: String,
    /// Command type.
    pub command_type: ScopeCommandType,
    /// Scope table flavor.
    pub scope_type: ScopeType,
}

/// Concurrent map from [`CacheKey`] to a lazily built command.
///
/// Each entry is an `OnceCell`: when several sessions ask for the same
/// command at once, exactly one builder runs and everyone gets its result.
/// A failed build leaves the cell empty.
#[derive(Debug, Default)]
pub struct CommandCache {
    entries: RwLock<HashMap<CacheKey, Arc<OnceCell<DbCommand>>>>,
}

impl CommandCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every scope builder of the process.
    pub fn global() -> Arc<CommandCache> {
        Arc::clone(&GLOBAL_CACHE)
    }

    /// Returns the cached command for `key`, building it with `init` on
    /// first use.
    ///
    /// # Errors
    ///
    /// Propagates the error of `init`; nothing is cached in that case.
    pub fn get_or_try_init<F>(&self, key: &CacheKey, init: F) -> ProviderResult<DbCommand>
    where
        F: FnOnce() -> ProviderResult<DbCommand>,
    {
        let existing = self.entries.read().get(key).cloned();
        let cell = match existing {
            Some(cell) => cell,
            None => Arc::clone(
                self.entries
                    .write()
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            ),
        };
        cell.get_or_try_init(init).cloned()
    }

    /// Number of initialized entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    /// Returns true if no entry is initialized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
