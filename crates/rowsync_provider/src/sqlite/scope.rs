//! SQLite handlers for the scope command vocabulary.

use super::builder::quote;
use super::clock::TIMESTAMP_FUNCTION;
use crate::command::DbCommand;
use crate::scope::{
    ScopeCommandType, ScopeHandler, ScopeHandlers, PARAM_SCOPE_NAME, SCOPE_COLUMNS,
};
use std::collections::HashMap;
use std::sync::Arc;

fn column_list() -> String {
    SCOPE_COLUMNS
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn with_scope_columns(cmd: DbCommand) -> DbCommand {
    SCOPE_COLUMNS
        .iter()
        .fold(cmd, |cmd, c| cmd.with_parameter(*c))
}

fn exists_scope_table(table: &str) -> DbCommand {
    DbCommand::new(
        "ExistsScopeTable",
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = @scope_table",
    )
    .with_value("scope_table", table)
}

fn create_scope_table(table: &str) -> DbCommand {
    DbCommand::new(
        "CreateScopeTable",
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             {name} TEXT NOT NULL PRIMARY KEY, \
             {id} TEXT NOT NULL, \
             {schema} TEXT NULL, \
             {setup} TEXT NULL, \
             {version} TEXT NULL, \
             {last} INTEGER NULL, \
             {last_server} INTEGER NULL, \
             {duration} INTEGER NULL)",
            table = quote(table),
            name = quote(SCOPE_COLUMNS[0]),
            id = quote(SCOPE_COLUMNS[1]),
            schema = quote(SCOPE_COLUMNS[2]),
            setup = quote(SCOPE_COLUMNS[3]),
            version = quote(SCOPE_COLUMNS[4]),
            last = quote(SCOPE_COLUMNS[5]),
            last_server = quote(SCOPE_COLUMNS[6]),
            duration = quote(SCOPE_COLUMNS[7]),
        ),
    )
}

fn get_scopes(table: &str) -> DbCommand {
    DbCommand::new(
        "GetScopes",
        format!(
            "SELECT {} FROM {} WHERE @{PARAM_SCOPE_NAME} IS NULL OR {} = @{PARAM_SCOPE_NAME}",
            column_list(),
            quote(table),
            quote(PARAM_SCOPE_NAME),
        ),
    )
}

fn insert_scope(table: &str) -> DbCommand {
    let values = SCOPE_COLUMNS
        .iter()
        .map(|c| format!("@{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    with_scope_columns(DbCommand::new(
        "InsertScope",
        format!(
            "INSERT INTO {} ({}) VALUES ({values})",
            quote(table),
            column_list()
        ),
    ))
}

fn update_scope(table: &str) -> DbCommand {
    let assignments = SCOPE_COLUMNS[1..]
        .iter()
        .map(|c| format!("{} = @{c}", quote(c)))
        .collect::<Vec<_>>()
        .join(", ");
    with_scope_columns(DbCommand::new(
        "UpdateScope",
        format!(
            "UPDATE {} SET {assignments} WHERE {} = @{PARAM_SCOPE_NAME}",
            quote(table),
            quote(PARAM_SCOPE_NAME)
        ),
    ))
}

fn exists_scope(table: &str) -> DbCommand {
    DbCommand::new(
        "ExistsScope",
        format!(
            "SELECT COUNT(*) FROM {} WHERE {} = @{PARAM_SCOPE_NAME}",
            quote(table),
            quote(PARAM_SCOPE_NAME)
        ),
    )
}

fn get_local_timestamp(_table: &str) -> DbCommand {
    DbCommand::new("GetLocalTimestamp", format!("SELECT {TIMESTAMP_FUNCTION}()"))
}

fn drop_scope_table(table: &str) -> DbCommand {
    DbCommand::new(
        "DropScopeTable",
        format!("DROP TABLE IF EXISTS {}", quote(table)),
    )
}

fn delete_scope(table: &str) -> DbCommand {
    DbCommand::new(
        "DeleteScope",
        format!(
            "DELETE FROM {} WHERE {} = @{PARAM_SCOPE_NAME}",
            quote(table),
            quote(PARAM_SCOPE_NAME)
        ),
    )
}

/// Builds the handler table for SQLite.
pub fn handlers() -> ScopeHandlers {
    let entries: [(ScopeCommandType, fn(&str) -> DbCommand); 9] = [
        (ScopeCommandType::ExistsScopeTable, exists_scope_table),
        (ScopeCommandType::CreateScopeTable, create_scope_table),
        (ScopeCommandType::GetScopes, get_scopes),
        (ScopeCommandType::InsertScope, insert_scope),
        (ScopeCommandType::UpdateScope, update_scope),
        (ScopeCommandType::ExistsScope, exists_scope),
        (ScopeCommandType::GetLocalTimestamp, get_local_timestamp),
        (ScopeCommandType::DropScopeTable, drop_scope_table),
        (ScopeCommandType::DeleteScope, delete_scope),
    ];
    let mut map: ScopeHandlers = HashMap::with_capacity(entries.len());
    for (command_type, build) in entries {
        let handler: ScopeHandler = Arc::new(build);
        map.insert(command_type, handler);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_has_a_handler() {
        let map = handlers();
        for command in ScopeCommandType::ALL {
            assert!(map.contains_key(&command), "{command:?}");
        }
    }

    #[test]
    fn update_keys_on_scope_name() {
        let cmd = update_scope("scope_info");
        assert!(cmd
            .text
            .ends_with("WHERE [sync_scope_name] = @sync_scope_name"));
        assert!(!cmd.text.contains("SET [sync_scope_name]"));
        assert_eq!(cmd.parameters.len(), SCOPE_COLUMNS.len());
    }
}
