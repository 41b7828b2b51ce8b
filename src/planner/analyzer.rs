//! Pluggable SQL analysis.
//!
//! The planner never parses SQL itself; it asks a [`DialectAnalyzer`] for a
//! [`QueryShape`] and for the two text rewrites it knows how to apply. The
//! bundled [`HeuristicAnalyzer`] works on tokens and regular expressions, so
//! malformed or exotic SQL degrades to a partial shape instead of failing.
//! A real parser can be swapped in without touching the coordinator.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::QueryKind;

/// A table named in `FROM`, `JOIN`, `UPDATE` or `INTO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Table name as written, lower-cased.
    pub name: String,
    /// Alias, if one follows the name.
    pub alias: Option<String>,
}

/// A column referenced by a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Table name or alias before the dot, lower-cased.
    pub qualifier: Option<String>,
    /// Column name, lower-cased.
    pub column: String,
}

/// Static facts extracted from query text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryShape {
    /// Statement kind.
    pub kind: Option<QueryKind>,
    /// Tables in order of appearance.
    pub tables: Vec<TableRef>,
    /// `JOIN` keywords.
    pub joins: usize,
    /// `GROUP BY` clauses.
    pub group_bys: usize,
    /// `ORDER BY` clauses.
    pub order_bys: usize,
    /// `WHERE` clauses.
    pub wheres: usize,
    /// Opening parentheses, a cheap proxy for subqueries.
    pub paren_groups: usize,
    /// Whether a `LIMIT` clause is present.
    pub has_limit: bool,
    /// Whether the projection is a bare `SELECT *`.
    pub wildcard_projection: bool,
    /// Deduplicated columns compared in `WHERE` and `JOIN ... ON` clauses.
    pub predicate_columns: Vec<ColumnRef>,
}

impl QueryShape {
    /// First table of the statement.
    pub fn primary_table(&self) -> Option<&str> {
        self.tables.first().map(|t| t.name.as_str())
    }

    /// Resolves the table a predicate column belongs to. Unqualified columns
    /// are attributed to the primary table.
    pub fn resolve_table(&self, column: &ColumnRef) -> Option<&str> {
        match &column.qualifier {
            None => self.primary_table(),
            Some(q) => self
                .tables
                .iter()
                .find(|t| t.alias.as_deref() == Some(q.as_str()) || &t.name == q)
                .map(|t| t.name.as_str()),
        }
    }
}

/// Produces query shapes and text rewrites for one SQL dialect.
pub trait DialectAnalyzer: Send + Sync {
    /// Extracts the static shape of `query`. Must not fail.
    fn analyze(&self, query: &str) -> QueryShape;

    /// Replaces a bare `*` projection with `columns`, or `None` if the
    /// query has no such projection.
    fn expand_wildcard(&self, query: &str, columns: &[String]) -> Option<String>;

    /// Appends a row cap, or `None` if the query already has one.
    fn append_row_cap(&self, query: &str, cap: u64) -> Option<String>;
}

/// Regex-based analyzer for ANSI-flavoured SQL.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicAnalyzer;

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "null", "true", "false", "select", "from", "where", "join", "inner",
    "left", "right", "full", "outer", "cross", "on", "group", "order", "by", "having", "limit",
    "offset", "union", "set", "values", "as", "in", "like", "ilike", "between", "is", "exists",
    "case", "when", "then", "else", "end", "returning", "using", "natural", "default",
];

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

macro_rules! cached_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("static regex"))
        }
    };
}

cached_regex!(join_re, r"(?i)\bJOIN\b");
cached_regex!(group_by_re, r"(?i)\bGROUP\s+BY\b");
cached_regex!(order_by_re, r"(?i)\bORDER\s+BY\b");
cached_regex!(where_re, r"(?i)\bWHERE\b");
cached_regex!(limit_re, r"(?i)\b(?:LIMIT|FETCH\s+FIRST|TOP)\b");
cached_regex!(wildcard_re, r"(?i)^(\s*SELECT\s+)\*(\s+FROM\b)");
cached_regex!(
    table_re,
    r"(?i)\b(?:FROM|JOIN|UPDATE|INTO)\s+([A-Za-z_][A-Za-z0-9_.]*)(?:\s+(?:AS\s+)?([A-Za-z_][A-Za-z0-9_]*))?"
);
cached_regex!(
    clause_re,
    r"(?i)\b(WHERE|ON|GROUP\s+BY|ORDER\s+BY|HAVING|LIMIT|OFFSET|UNION|JOIN|INNER|LEFT|RIGHT|FULL|CROSS|SET|VALUES|RETURNING)\b"
);
cached_regex!(
    comparison_re,
    r"(?i)([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)\s*(?:<>|!=|<=|>=|=|<|>|\s(?:NOT\s+)?(?:LIKE|ILIKE|IN|BETWEEN)\b)\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)?"
);

impl DialectAnalyzer for HeuristicAnalyzer {
    fn analyze(&self, query: &str) -> QueryShape {
        let text = mask_literals(query);
        let mut shape = QueryShape {
            kind: Some(QueryKind::from_sql(&text)),
            joins: join_re().find_iter(&text).count(),
            group_bys: group_by_re().find_iter(&text).count(),
            order_bys: order_by_re().find_iter(&text).count(),
            wheres: where_re().find_iter(&text).count(),
            paren_groups: text.matches('(').count(),
            has_limit: limit_re().is_match(&text),
            wildcard_projection: wildcard_re().is_match(&text),
            ..QueryShape::default()
        };

        let mut pos = 0;
        while let Some(caps) = table_re().captures_at(&text, pos) {
            let Some(whole) = caps.get(0) else { break };
            let name = caps[1].to_ascii_lowercase();
            let alias = match caps.get(2) {
                // A keyword after the name starts the next clause; rescan from it.
                Some(m) if is_keyword(m.as_str()) => {
                    pos = m.start();
                    None
                }
                Some(m) => {
                    pos = whole.end();
                    Some(m.as_str().to_ascii_lowercase())
                }
                None => {
                    pos = whole.end();
                    None
                }
            };
            if !shape.tables.iter().any(|t| t.name == name && t.alias == alias) {
                shape.tables.push(TableRef { name, alias });
            }
        }

        for segment in predicate_segments(&text) {
            collect_columns(segment, &mut shape.predicate_columns);
        }
        shape
    }

    fn expand_wildcard(&self, query: &str, columns: &[String]) -> Option<String> {
        if columns.is_empty() || !wildcard_re().is_match(query) {
            return None;
        }
        let list = columns.join(", ");
        Some(
            wildcard_re()
                .replace(query, |caps: &regex::Captures<'_>| {
                    format!("{}{}{}", &caps[1], list, &caps[2])
                })
                .into_owned(),
        )
    }

    fn append_row_cap(&self, query: &str, cap: u64) -> Option<String> {
        if limit_re().is_match(&mask_literals(query)) {
            return None;
        }
        let body = query.trim_end().trim_end_matches(';').trim_end();
        Some(format!("{body} LIMIT {cap}"))
    }
}

/// Replaces the contents of single-quoted literals with blanks so keywords
/// inside strings do not count. Byte offsets are preserved.
fn mask_literals(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut in_literal = false;
    for ch in query.chars() {
        if ch == '\'' {
            in_literal = !in_literal;
            out.push(ch);
        } else if in_literal {
            for _ in 0..ch.len_utf8() {
                out.push(' ');
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Text following each `WHERE`/`ON` keyword up to the next clause keyword.
fn predicate_segments(text: &str) -> Vec<&str> {
    let marks: Vec<_> = clause_re().find_iter(text).collect();
    let mut segments = Vec::new();
    for (idx, mark) in marks.iter().enumerate() {
        let keyword = mark.as_str();
        if !keyword.eq_ignore_ascii_case("where") && !keyword.eq_ignore_ascii_case("on") {
            continue;
        }
        let end = marks.get(idx + 1).map_or(text.len(), |next| next.start());
        segments.push(&text[mark.end()..end]);
    }
    segments
}

fn collect_columns(segment: &str, out: &mut Vec<ColumnRef>) {
    for caps in comparison_re().captures_iter(segment) {
        push_column(&caps[1], out);
        if let Some(rhs) = caps.get(2) {
            let called = segment[rhs.end()..].trim_start().starts_with('(');
            if !called {
                push_column(rhs.as_str(), out);
            }
        }
    }
}

fn push_column(raw: &str, out: &mut Vec<ColumnRef>) {
    let lowered = raw.to_ascii_lowercase();
    let (qualifier, column) = match lowered.rsplit_once('.') {
        Some((q, c)) => (Some(q.to_string()), c.to_string()),
        None => (None, lowered),
    };
    if is_keyword(&column) {
        return;
    }
    let col = ColumnRef { qualifier, column };
    if !out.contains(&col) {
        out.push(col);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(shape: &QueryShape) -> Vec<String> {
        shape
            .predicate_columns
            .iter()
            .map(|c| match &c.qualifier {
                Some(q) => format!("{q}.{}", c.column),
                None => c.column.clone(),
            })
            .collect()
    }

    #[test]
    fn counts_clauses() {
        let shape = HeuristicAnalyzer.analyze(
            "SELECT p.name, COUNT(*) FROM projects p JOIN users u ON p.owner_id = u.id \
             WHERE u.active = ? GROUP BY p.name ORDER BY p.name",
        );
        assert_eq!(shape.kind, Some(QueryKind::Select));
        assert_eq!(shape.joins, 1);
        assert_eq!(shape.group_bys, 1);
        assert_eq!(shape.order_bys, 1);
        assert_eq!(shape.wheres, 1);
        assert_eq!(shape.paren_groups, 1);
        assert!(!shape.has_limit);
        assert!(!shape.wildcard_projection);
    }

    #[test]
    fn extracts_tables_and_aliases() {
        let shape = HeuristicAnalyzer.analyze(
            "SELECT * FROM projects AS p LEFT JOIN users u ON p.owner_id = u.id WHERE p.id = 1",
        );
        assert_eq!(
            shape.tables,
            vec![
                TableRef {
                    name: "projects".into(),
                    alias: Some("p".into())
                },
                TableRef {
                    name: "users".into(),
                    alias: Some("u".into())
                },
            ]
        );
        let owner = ColumnRef {
            qualifier: Some("u".into()),
            column: "id".into(),
        };
        assert_eq!(shape.resolve_table(&owner), Some("users"));

        let unaliased = HeuristicAnalyzer
            .analyze("SELECT * FROM projects JOIN users ON projects.owner_id = users.id");
        let names: Vec<_> = unaliased.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["projects", "users"]);
        assert!(unaliased.tables.iter().all(|t| t.alias.is_none()));
    }

    #[test]
    fn extracts_predicate_columns() {
        let shape = HeuristicAnalyzer.analyze(
            "SELECT * FROM projects p JOIN users u ON p.owner_id = u.id \
             WHERE p.status IN (?, ?) AND u.email LIKE ? AND p.created_at >= ? AND p.status = ?",
        );
        assert_eq!(
            columns(&shape),
            vec!["p.owner_id", "u.id", "p.status", "u.email", "p.created_at"]
        );
    }

    #[test]
    fn ignores_keywords_inside_literals() {
        let shape = HeuristicAnalyzer
            .analyze("SELECT * FROM notes WHERE body = 'join us WHERE x = 1' ORDER BY id");
        assert_eq!(shape.joins, 0);
        assert_eq!(shape.wheres, 1);
        assert_eq!(columns(&shape), vec!["body"]);
    }

    #[test]
    fn function_calls_are_not_columns() {
        let shape = HeuristicAnalyzer.analyze(
            "SELECT * FROM users WHERE email = lower(?) AND deleted = NULL",
        );
        assert_eq!(columns(&shape), vec!["email", "deleted"]);
    }

    #[test]
    fn malformed_sql_degrades() {
        let shape = HeuristicAnalyzer.analyze("WHERE = = ( ON");
        assert!(shape.predicate_columns.is_empty());
        assert!(shape.tables.is_empty());
        let empty = HeuristicAnalyzer.analyze("");
        assert_eq!(empty.kind, Some(QueryKind::Other));
    }

    #[test]
    fn expands_wildcard() {
        let cols = vec!["id".to_string(), "name".to_string()];
        assert_eq!(
            HeuristicAnalyzer
                .expand_wildcard("SELECT * FROM projects WHERE id = ?", &cols)
                .as_deref(),
            Some("SELECT id, name FROM projects WHERE id = ?")
        );
        assert!(HeuristicAnalyzer
            .expand_wildcard("SELECT id FROM projects", &cols)
            .is_none());
    }

    #[test]
    fn appends_row_cap_once() {
        assert_eq!(
            HeuristicAnalyzer
                .append_row_cap("SELECT id FROM t ORDER BY id;", 50)
                .as_deref(),
            Some("SELECT id FROM t ORDER BY id LIMIT 50")
        );
        assert!(HeuristicAnalyzer
            .append_row_cap("SELECT id FROM t ORDER BY id LIMIT 5", 50)
            .is_none());
    }
}
