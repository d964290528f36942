//! Table name parsing and the naming contract shared across the sync stack.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Anything identified by a table name plus an optional schema namespace.
///
/// Two named items denote the same table when both parts match
/// case-insensitively. Batch parts, schema tables, setup tables and
/// tracking metadata all compare through this trait.
pub trait SyncNamed {
    /// Unquoted table name.
    fn table_name(&self) -> &str;

    /// Unquoted schema name, empty when absent.
    fn schema_name(&self) -> &str;

    /// Returns true if `other` names the same table.
    fn is_same_table<O: SyncNamed + ?Sized>(&self, other: &O) -> bool {
        self.table_name().eq_ignore_ascii_case(other.table_name())
            && self.schema_name().eq_ignore_ascii_case(other.schema_name())
    }

    /// `schema.table`, or just `table` when there is no schema.
    fn full_name(&self) -> String {
        if self.schema_name().is_empty() {
            self.table_name().to_string()
        } else {
            format!("{}.{}", self.schema_name(), self.table_name())
        }
    }
}

/// A parsed, possibly schema-qualified, possibly quoted object name.
///
/// Accepts `Orders`, `[dbo].[Orders]`, `"sales"."Order Lines"` and
/// `` `Orders` ``.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    schema: String,
    name: String,
}

impl ParsedName {
    /// Parses an object name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidName`] for empty input, empty segments or
    /// unterminated quotes.
    pub fn parse(input: &str) -> CoreResult<Self> {
        let segments = split_segments(input)?;
        let mut iter = segments.into_iter().rev();
        let name = iter
            .next()
            .ok_or_else(|| CoreError::InvalidName(input.to_string()))?;
        let schema = iter.next().unwrap_or_default();
        Ok(Self { schema, name })
    }

    /// Builds a name from already-unquoted parts.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Unquoted object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unquoted schema, empty when absent.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// File-system and identifier friendly form: `schema_table` with dots,
    /// spaces and dashes replaced by underscores.
    pub fn normalized(&self) -> String {
        let joined = if self.schema.is_empty() {
            self.name.clone()
        } else {
            format!("{}_{}", self.schema, self.name)
        };
        joined
            .chars()
            .map(|c| match c {
                '.' | ' ' | '-' => '_',
                other => other,
            })
            .collect()
    }

    /// Quotes each part with the given delimiters, e.g. `("[", "]")`.
    pub fn quoted(&self, open: &str, close: &str) -> String {
        if self.schema.is_empty() {
            format!("{open}{}{close}", self.name)
        } else {
            format!("{open}{}{close}.{open}{}{close}", self.schema, self.name)
        }
    }
}

impl SyncNamed for ParsedName {
    fn table_name(&self) -> &str {
        &self.name
    }

    fn schema_name(&self) -> &str {
        &self.schema
    }
}

impl fmt::Display for ParsedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

fn split_segments(input: &str) -> CoreResult<Vec<String>> {
    let invalid = || CoreError::InvalidName(input.to_string());
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut closing: Option<char> = None;

    for c in trimmed.chars() {
        match closing {
            Some(close) if c == close => closing = None,
            Some(_) => current.push(c),
            None => match c {
                '[' => closing = Some(']'),
                '"' => closing = Some('"'),
                '`' => closing = Some('`'),
                '.' => {
                    if current.is_empty() {
                        return Err(invalid());
                    }
                    segments.push(std::mem::take(&mut current));
                }
                other => current.push(other),
            },
        }
    }

    if closing.is_some() || current.is_empty() {
        return Err(invalid());
    }
    segments.push(current);
    Ok(segments)
}
