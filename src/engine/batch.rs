//! SQL generation for batched bulk operations.
//!
//! Each chunk becomes exactly one parameterized statement. Identifiers are
//! checked against a conservative pattern because they are spliced into the
//! text; values always travel as parameters.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{QueryError, Result};
use crate::model::{BatchOperation, Row, Statement};

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("static regex")
    })
}

/// Rejects names that are unsafe to splice into SQL text.
pub(crate) fn check_identifier(name: &str, what: &str) -> Result<()> {
    if identifier_re().is_match(name) {
        Ok(())
    } else {
        Err(QueryError::InvalidArgument(format!(
            "invalid {what} identifier {name:?}"
        )))
    }
}

/// Builds the statement for one chunk. `first_row` is the index of the
/// chunk's first row in the whole batch, used in messages.
pub(crate) fn chunk_statement(
    operation: BatchOperation,
    table: &str,
    key: &str,
    rows: &[Row],
    first_row: usize,
) -> std::result::Result<Statement, String> {
    match operation {
        BatchOperation::Insert => insert_statement(table, rows),
        BatchOperation::Update => update_statement(table, key, rows, first_row),
        BatchOperation::Delete => delete_statement(table, key, rows, first_row),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn column_union<'a>(
    rows: &'a [Row],
    skip: Option<&str>,
) -> std::result::Result<Vec<&'a str>, String> {
    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .filter(|column| Some(*column) != skip)
        .collect();
    for column in &columns {
        if !identifier_re().is_match(column) {
            return Err(format!("invalid column identifier {column:?}"));
        }
    }
    Ok(columns.into_iter().collect())
}

fn keys_of(rows: &[Row], key: &str, first_row: usize) -> std::result::Result<Vec<Value>, String> {
    rows.iter()
        .enumerate()
        .map(|(offset, row)| {
            row.get(key)
                .cloned()
                .ok_or_else(|| format!("row {} is missing key column {key:?}", first_row + offset))
        })
        .collect()
}

fn insert_statement(table: &str, rows: &[Row]) -> std::result::Result<Statement, String> {
    let columns = column_union(rows, None)?;
    if columns.is_empty() {
        return Err("rows have no columns to insert".into());
    }
    let tuple = format!("({})", placeholders(columns.len()));
    let tuples = vec![tuple.as_str(); rows.len()].join(", ");
    let mut params = Vec::with_capacity(rows.len() * columns.len());
    for row in rows {
        for column in &columns {
            params.push(row.get(*column).cloned().unwrap_or(Value::Null));
        }
    }
    Ok(Statement::new(
        format!(
            "INSERT INTO {table} ({}) VALUES {tuples}",
            columns.join(", ")
        ),
        params,
    ))
}

fn delete_statement(
    table: &str,
    key: &str,
    rows: &[Row],
    first_row: usize,
) -> std::result::Result<Statement, String> {
    let keys = keys_of(rows, key, first_row)?;
    Ok(Statement::new(
        format!(
            "DELETE FROM {table} WHERE {key} IN ({})",
            placeholders(keys.len())
        ),
        keys,
    ))
}

fn update_statement(
    table: &str,
    key: &str,
    rows: &[Row],
    first_row: usize,
) -> std::result::Result<Statement, String> {
    let keys = keys_of(rows, key, first_row)?;
    let columns = column_union(rows, Some(key))?;
    if columns.is_empty() {
        return Err("rows have no columns to update".into());
    }

    let mut params = Vec::new();
    let mut assignments = Vec::with_capacity(columns.len());
    for column in &columns {
        let mut arms = String::new();
        for (row, row_key) in rows.iter().zip(&keys) {
            if let Some(value) = row.get(*column) {
                arms.push_str(" WHEN ? THEN ?");
                params.push(row_key.clone());
                params.push(value.clone());
            }
        }
        assignments.push(format!("{column} = CASE {key}{arms} ELSE {column} END"));
    }
    let key_count = keys.len();
    params.extend(keys);
    Ok(Statement::new(
        format!(
            "UPDATE {table} SET {} WHERE {key} IN ({})",
            assignments.join(", "),
            placeholders(key_count)
        ),
        params,
    ))
}
