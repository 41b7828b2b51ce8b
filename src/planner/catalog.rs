use std::collections::{HashMap, HashSet};

/// Host-registered schema knowledge: the columns of each table and the
/// columns already covered by an index.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    columns: HashMap<String, Vec<String>>,
    indexed: HashMap<String, HashSet<String>>,
}

impl SchemaCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the column list of `table`, replacing any previous one.
    pub fn register_table<I, S>(&mut self, table: &str, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.insert(
            table.to_ascii_lowercase(),
            columns.into_iter().map(Into::into).collect(),
        );
    }

    /// Records an existing index. Only its leading column serves lookups.
    pub fn register_index<I, S>(&mut self, table: &str, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(lead) = columns.into_iter().next() {
            self.indexed
                .entry(table.to_ascii_lowercase())
                .or_default()
                .insert(lead.into().to_ascii_lowercase());
        }
    }

    /// Known columns of `table`.
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.columns
            .get(&table.to_ascii_lowercase())
            .map(Vec::as_slice)
            .filter(|cols| !cols.is_empty())
    }

    /// Whether an index leads with `column` on `table`.
    pub fn is_indexed(&self, table: &str, column: &str) -> bool {
        self.indexed
            .get(&table.to_ascii_lowercase())
            .is_some_and(|cols| cols.contains(&column.to_ascii_lowercase()))
    }
}
