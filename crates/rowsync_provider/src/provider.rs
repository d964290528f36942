//! The provider seam and the registry of dialects.

use crate::command::DbConnection;
use crate::error::{ProviderError, ProviderResult};
use crate::scope::{ScopeBuilder, ScopeHandlers};
use crate::sqlite::SqliteSyncProvider;
use crate::table::DbTableBuilder;
use rowsync_core::SyncTable;
use std::collections::HashMap;
use std::sync::Arc;

/// A backing-store dialect.
///
/// Everything above this trait is dialect-neutral: orchestration only
/// sees commands, builders and connections.
pub trait SyncProvider: Send + Sync {
    /// Dialect id (`"sqlite"`).
    fn dialect(&self) -> &'static str;

    /// The scope command handler table, built once per provider.
    fn scope_handlers(&self) -> Arc<ScopeHandlers>;

    /// A scope builder bound to `scope_info_table`.
    fn scope_builder(&self, scope_info_table: &str) -> ScopeBuilder {
        ScopeBuilder::new(scope_info_table, self.scope_handlers())
    }

    /// A table builder for one table.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidSchema`] for tables that cannot be
    /// tracked.
    fn table_builder(&self, table: &SyncTable) -> ProviderResult<Box<dyn DbTableBuilder>>;

    /// Reads the structure of an existing table. `None` if it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidSchema`] for tables without a primary
    /// key, or a query error.
    fn describe_table(
        &self,
        connection: &dyn DbConnection,
        table_name: &str,
        schema_name: &str,
    ) -> ProviderResult<Option<SyncTable>>;

    /// Opens a connection to a data source.
    ///
    /// # Errors
    ///
    /// Returns the driver error if the data source cannot be opened.
    fn open(&self, data_source: &str) -> ProviderResult<Box<dyn DbConnection>>;
}

/// Providers keyed by dialect id.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SyncProvider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in providers.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(SqliteSyncProvider::new()));
        registry
    }

    /// Registers a provider, replacing any with the same dialect id.
    pub fn register(&mut self, provider: Arc<dyn SyncProvider>) {
        self.providers
            .insert(provider.dialect().to_ascii_lowercase(), provider);
    }

    /// Looks a provider up, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownProvider`] when nothing is registered
    /// under `dialect`.
    pub fn get(&self, dialect: &str) -> ProviderResult<Arc<dyn SyncProvider>> {
        self.providers
            .get(&dialect.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(dialect.to_string()))
    }

    /// Registered dialect ids, sorted.
    pub fn dialects(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("dialects", &self.dialects())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_is_registered_by_default() {
        let registry = ProviderRegistry::new();
        assert_eq!(registry.dialects(), vec!["sqlite"]);
        assert_eq!(registry.get("SQLite").unwrap().dialect(), "sqlite");
    }

    #[test]
    fn unknown_dialect() {
        let registry = ProviderRegistry::empty();
        assert!(matches!(
            registry.get("oracle"),
            Err(ProviderError::UnknownProvider(name)) if name == "oracle"
        ));
    }
}
