//! Idempotent creation and removal of tracking infrastructure.

use crate::command::DbConnection;
use crate::error::ProviderResult;
use crate::table::{DbTableBuilder, TableCommand};
use crate::trigger::TriggerKind;
use rowsync_core::SyncValue;

/// Which objects a provisioning pass touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionFlags {
    /// Base table.
    pub table: bool,
    /// Tracking table.
    pub tracking_table: bool,
    /// The three triggers.
    pub triggers: bool,
}

impl ProvisionFlags {
    /// Tracking table and triggers; the base table is left alone.
    pub const TRACKING: ProvisionFlags = ProvisionFlags {
        table: false,
        tracking_table: true,
        triggers: true,
    };

    /// Everything, including the base table.
    pub const ALL: ProvisionFlags = ProvisionFlags {
        table: true,
        tracking_table: true,
        triggers: true,
    };
}

impl Default for ProvisionFlags {
    fn default() -> Self {
        Self::TRACKING
    }
}

/// Runs a table builder's DDL against a borrowed connection.
///
/// Every operation checks existence first, so creating an existing object or
/// dropping a missing one does nothing.
pub struct TableProvisioner<'a> {
    builder: &'a dyn DbTableBuilder,
    connection: &'a dyn DbConnection,
}

impl<'a> TableProvisioner<'a> {
    /// Creates a provisioner.
    pub fn new(builder: &'a dyn DbTableBuilder, connection: &'a dyn DbConnection) -> Self {
        Self {
            builder,
            connection,
        }
    }

    fn exists(&self, command: TableCommand) -> ProviderResult<bool> {
        let cmd = self.builder.command(command)?;
        Ok(self
            .connection
            .query_scalar(&cmd)?
            .and_then(|v: SyncValue| v.as_integer())
            .unwrap_or(0)
            > 0)
    }

    fn run(&self, command: TableCommand) -> ProviderResult<()> {
        let cmd = self.builder.command(command)?;
        self.connection.execute(&cmd)?;
        Ok(())
    }

    fn create_if_missing(&self, exists: TableCommand, create: TableCommand) -> ProviderResult<bool> {
        if self.exists(exists)? {
            return Ok(false);
        }
        self.run(create)?;
        tracing::debug!(table = %self.builder.names().table, command = ?create, "created");
        Ok(true)
    }

    fn drop_if_present(&self, exists: TableCommand, drop: TableCommand) -> ProviderResult<bool> {
        if !self.exists(exists)? {
            return Ok(false);
        }
        self.run(drop)?;
        tracing::debug!(table = %self.builder.names().table, command = ?drop, "dropped");
        Ok(true)
    }

    /// Returns true if the base table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn table_exists(&self) -> ProviderResult<bool> {
        self.exists(TableCommand::ExistsTable)
    }

    /// Returns true if the tracking table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn tracking_table_exists(&self) -> ProviderResult<bool> {
        self.exists(TableCommand::ExistsTrackingTable)
    }

    /// Returns true if a trigger exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn trigger_exists(&self, kind: TriggerKind) -> ProviderResult<bool> {
        self.exists(TableCommand::ExistsTrigger(kind))
    }

    /// Creates the base table. Returns true if it was created.
    ///
    /// # Errors
    ///
    /// Returns an error if a command fails.
    pub fn create_table(&self) -> ProviderResult<bool> {
        self.create_if_missing(TableCommand::ExistsTable, TableCommand::CreateTable)
    }

    /// Creates the tracking table and tracks the rows the base table
    /// already holds. Returns true if it was created.
    ///
    /// # Errors
    ///
    /// Returns an error if a command fails.
    pub fn create_tracking_table(&self) -> ProviderResult<bool> {
        let created = self.create_if_missing(
            TableCommand::ExistsTrackingTable,
            TableCommand::CreateTrackingTable,
        )?;
        if created && self.table_exists()? {
            let cmd = self.builder.command(TableCommand::PopulateTrackingTable)?;
            let rows = self.connection.execute(&cmd)?;
            tracing::debug!(table = %self.builder.names().table, rows, "existing rows tracked");
        }
        Ok(created)
    }

    /// Creates a trigger. Returns true if it was created.
    ///
    /// # Errors
    ///
    /// Returns an error if a command fails.
    pub fn create_trigger(&self, kind: TriggerKind) -> ProviderResult<bool> {
        self.create_if_missing(
            TableCommand::ExistsTrigger(kind),
            TableCommand::CreateTrigger(kind),
        )
    }

    /// Drops a trigger. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if a command fails.
    pub fn drop_trigger(&self, kind: TriggerKind) -> ProviderResult<bool> {
        self.drop_if_present(
            TableCommand::ExistsTrigger(kind),
            TableCommand::DropTrigger(kind),
        )
    }

    /// Drops the tracking table. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if a command fails.
    pub fn drop_tracking_table(&self) -> ProviderResult<bool> {
        self.drop_if_present(
            TableCommand::ExistsTrackingTable,
            TableCommand::DropTrackingTable,
        )
    }

    /// Drops the base table. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if a command fails.
    pub fn drop_table(&self) -> ProviderResult<bool> {
        self.drop_if_present(TableCommand::ExistsTable, TableCommand::DropTable)
    }

    /// Creates the objects selected by `flags`, parents first.
    ///
    /// # Errors
    ///
    /// Returns the first failing command's error.
    pub fn provision(&self, flags: ProvisionFlags) -> ProviderResult<()> {
        if flags.table {
            self.create_table()?;
        }
        if flags.tracking_table {
            self.create_tracking_table()?;
        }
        if flags.triggers {
            for kind in TriggerKind::ALL {
                self.create_trigger(kind)?;
            }
        }
        tracing::info!(table = %self.builder.names().table, ?flags, "table provisioned");
        Ok(())
    }

    /// Drops the objects selected by `flags`, triggers first.
    ///
    /// # Errors
    ///
    /// Returns the first failing command's error.
    pub fn deprovision(&self, flags: ProvisionFlags) -> ProviderResult<()> {
        if flags.triggers {
            for kind in TriggerKind::ALL {
                self.drop_trigger(kind)?;
            }
        }
        if flags.tracking_table {
            self.drop_tracking_table()?;
        }
        if flags.table {
            self.drop_table()?;
        }
        tracing::info!(table = %self.builder.names().table, ?flags, "table deprovisioned");
        Ok(())
    }
}
