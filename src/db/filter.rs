//! Query descriptor builder.
//!
//! Handlers and analytics queries assemble their `WHERE` predicates as data
//! and submit them together with positional parameters. Every clause uses
//! anonymous `?` placeholders, bound in push order.

use rusqlite::types::Value;
use rusqlite::ParamsFromIter;

#[derive(Debug, Clone, Default)]
pub struct SqlFilter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl SqlFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate with exactly one `?` placeholder.
    pub fn bind(mut self, clause: &str, value: impl Into<Value>) -> Self {
        debug_assert_eq!(clause.matches('?').count(), 1);
        self.clauses.push(clause.to_string());
        self.params.push(value.into());
        self
    }

    /// Add a predicate with no placeholder.
    pub fn raw(mut self, clause: &str) -> Self {
        debug_assert!(!clause.contains('?'));
        self.clauses.push(clause.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// `WHERE a AND b`, or an empty string when unrestricted.
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> ParamsFromIter<std::slice::Iter<'_, Value>> {
        rusqlite::params_from_iter(self.params.iter())
    }

    /// Parameters for SQL that places one extra `?` ahead of the filter.
    pub fn params_with_leading(&self, leading: impl Into<Value>) -> ParamsFromIter<Vec<Value>> {
        let mut values = Vec::with_capacity(self.params.len() + 1);
        values.push(leading.into());
        values.extend(self.params.iter().cloned());
        rusqlite::params_from_iter(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_renders_nothing() {
        let filter = SqlFilter::new();
        assert!(filter.is_empty());
        assert_eq!(filter.where_sql(), "");
    }

    #[test]
    fn clauses_join_with_and() {
        let filter = SqlFilter::new()
            .bind("doctor_id = ?", "d-1".to_string())
            .raw("severity IS NOT NULL");
        assert_eq!(filter.where_sql(), "WHERE doctor_id = ? AND severity IS NOT NULL");
    }

    #[test]
    fn params_bind_in_push_order() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let count = |filter: SqlFilter| -> i64 {
            let sql = format!(
                "SELECT COUNT(*) FROM (SELECT 1 AS a, 2 AS b) {}",
                filter.where_sql()
            );
            conn.query_row(&sql, filter.params(), |row| row.get(0)).unwrap()
        };
        assert_eq!(count(SqlFilter::new().bind("a = ?", 1_i64).bind("b = ?", 2_i64)), 1);
        assert_eq!(count(SqlFilter::new().bind("a = ?", 2_i64).bind("b = ?", 1_i64)), 0);
    }
}
