//! Trigger templates.
//!
//! The three change-tracking triggers share one shape: upsert the tracking
//! row of the affected key, then set the tombstone flag, clear
//! `update_scope_id` and stamp `last_change_datetime`. A [`MirrorTemplate`]
//! captures the differences between them; dialects only render it.

use rowsync_core::SyncTable;
use std::fmt;

/// The statement a trigger fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// After insert.
    Insert,
    /// After update.
    Update,
    /// After delete.
    Delete,
}

impl TriggerKind {
    /// All kinds, in creation order.
    pub const ALL: [TriggerKind; 3] = [TriggerKind::Insert, TriggerKind::Update, TriggerKind::Delete];

    /// SQL event keyword.
    pub fn event(self) -> &'static str {
        match self {
            TriggerKind::Insert => "INSERT",
            TriggerKind::Update => "UPDATE",
            TriggerKind::Delete => "DELETE",
        }
    }

    /// Lower-case suffix used in trigger names.
    pub fn suffix(self) -> &'static str {
        match self {
            TriggerKind::Insert => "insert",
            TriggerKind::Update => "update",
            TriggerKind::Delete => "delete",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event())
    }
}

/// Which row image a trigger reads keys and values from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoTable {
    /// Post-image.
    New,
    /// Pre-image.
    Old,
}

impl PseudoTable {
    /// Row-level alias (`new` / `old`).
    pub fn alias(self) -> &'static str {
        match self {
            PseudoTable::New => "new",
            PseudoTable::Old => "old",
        }
    }
}

/// What a trigger writes into the tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTemplate {
    /// Trigger kind.
    pub kind: TriggerKind,
    /// Tombstone flag written into the tracking row.
    pub tombstone: bool,
    /// Image the primary key is read from.
    pub source: PseudoTable,
    /// Columns compared between images; mirroring is skipped when none
    /// differ. `None` means always mirror.
    pub diff_guard: Option<Vec<String>>,
}

impl MirrorTemplate {
    /// Builds the template of `kind` for `table`.
    pub fn for_table(kind: TriggerKind, table: &SyncTable) -> Self {
        match kind {
            TriggerKind::Insert => Self {
                kind,
                tombstone: false,
                source: PseudoTable::New,
                diff_guard: None,
            },
            TriggerKind::Update => {
                let columns: Vec<String> = table
                    .mutable_columns()
                    .into_iter()
                    .map(|c| c.name.clone())
                    .collect();
                Self {
                    kind,
                    tombstone: false,
                    source: PseudoTable::New,
                    diff_guard: (!columns.is_empty()).then_some(columns),
                }
            }
            TriggerKind::Delete => Self {
                kind,
                tombstone: true,
                source: PseudoTable::Old,
                diff_guard: None,
            },
        }
    }

    /// Renders the guard condition, or `None` when the trigger always
    /// mirrors.
    ///
    /// A column differs when exactly one side is NULL or both are non-NULL
    /// and unequal; `NULLIF` keeps NULL-vs-NULL on the "same" side.
    pub fn guard_expression(&self, quote: impl Fn(&str) -> String) -> Option<String> {
        let columns = self.diff_guard.as_ref()?;
        let terms: Vec<String> = columns
            .iter()
            .map(|c| {
                let c = quote(c);
                format!("(NULLIF(old.{c}, new.{c}) IS NOT NULL OR NULLIF(new.{c}, old.{c}) IS NOT NULL)")
            })
            .collect();
        Some(terms.join(" OR "))
    }

    /// Tombstone flag as an integer literal.
    pub fn tombstone_literal(&self) -> &'static str {
        if self.tombstone {
            "1"
        } else {
            "0"
        }
    }
}
