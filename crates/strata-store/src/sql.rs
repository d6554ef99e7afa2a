//! Minimal parameterized statement builder.
//!
//! Produces `(sql, params)` pairs with the engine's placeholder style.
//! Identifiers are validated, values are always bound, never inlined.

use std::sync::LazyLock;

use regex::Regex;

use crate::engine::{Placeholder, SqlValue};
use crate::errors::{Result, StoreError};

static TABLE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.]+$").expect("table name regex is valid"));

static PARAM_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][\w.]*$").expect("param key regex is valid"));

/// Whether `name` is safe to splice into SQL as a table identifier.
pub fn is_valid_table_name(name: &str) -> bool {
    TABLE_NAME_RE.is_match(name)
}

/// Whether `key` is a plain identifier usable as a driver parameter name.
pub fn is_valid_param_key(key: &str) -> bool {
    PARAM_KEY_RE.is_match(key)
}

fn check_ident(op: &'static str, kind: &str, name: &str) -> Result<()> {
    if is_valid_table_name(name) {
        Ok(())
    } else {
        Err(StoreError::SqlBuild {
            op,
            detail: format!("invalid {kind} identifier {name:?}"),
        })
    }
}

/// `INSERT INTO table (cols...) VALUES (...)`.
#[derive(Debug, Default)]
pub struct Insert {
    table: String,
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Insert {
    /// Start an insert into `table`.
    pub fn into(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }

    /// Column list.
    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(ToString::to_string).collect();
        self
    }

    /// One value per column, in column order.
    #[must_use]
    pub fn values(mut self, values: Vec<SqlValue>) -> Self {
        self.values = values;
        self
    }

    /// Render the statement.
    pub fn build(self, placeholder: Placeholder) -> Result<(String, Vec<SqlValue>)> {
        const OP: &str = "sql.insert";
        check_ident(OP, "table", &self.table)?;
        if self.columns.is_empty() {
            return Err(StoreError::SqlBuild {
                op: OP,
                detail: "insert without columns".into(),
            });
        }
        if self.columns.len() != self.values.len() {
            return Err(StoreError::SqlBuild {
                op: OP,
                detail: format!(
                    "{} columns but {} values",
                    self.columns.len(),
                    self.values.len()
                ),
            });
        }
        for column in &self.columns {
            check_ident(OP, "column", column)?;
        }

        let marks: Vec<String> = (1..=self.values.len()).map(|n| placeholder.nth(n)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            self.columns.join(", "),
            marks.join(", ")
        );
        Ok((sql, self.values))
    }
}

/// `SELECT cols FROM table [WHERE c = ? AND ...] [ORDER BY ...]`.
#[derive(Debug, Default)]
pub struct Select {
    columns: Vec<String>,
    table: String,
    filters: Vec<(String, SqlValue)>,
    order_by: Option<String>,
}

impl Select {
    /// Start a select of `columns`.
    pub fn columns(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    /// Source table.
    #[must_use]
    pub fn from(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    /// Add an equality filter, AND-ed with previous ones.
    #[must_use]
    pub fn where_eq(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    /// Ordering clause, e.g. `created_at ASC`.
    #[must_use]
    pub fn order_by(mut self, clause: &str) -> Self {
        self.order_by = Some(clause.to_string());
        self
    }

    /// Render the statement.
    pub fn build(self, placeholder: Placeholder) -> Result<(String, Vec<SqlValue>)> {
        const OP: &str = "sql.select";
        check_ident(OP, "table", &self.table)?;
        if self.columns.is_empty() {
            return Err(StoreError::SqlBuild {
                op: OP,
                detail: "select without columns".into(),
            });
        }
        for column in &self.columns {
            check_ident(OP, "column", column)?;
        }

        let mut sql = format!("SELECT {} FROM {}", self.columns.join(", "), self.table);
        let mut params = Vec::with_capacity(self.filters.len());
        for (i, (column, value)) in self.filters.into_iter().enumerate() {
            check_ident(OP, "column", &column)?;
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&column);
            sql.push_str(" = ");
            sql.push_str(&placeholder.nth(i + 1));
            params.push(value);
        }

        if let Some(clause) = self.order_by {
            let mut parts = clause.split_whitespace();
            let column = parts.next().unwrap_or_default();
            check_ident(OP, "order column", column)?;
            let direction = match parts.next().map(str::to_ascii_uppercase).as_deref() {
                None | Some("ASC") => "ASC",
                Some("DESC") => "DESC",
                Some(other) => {
                    return Err(StoreError::SqlBuild {
                        op: OP,
                        detail: format!("invalid order direction {other:?}"),
                    });
                }
            };
            sql.push_str(&format!(" ORDER BY {column} {direction}"));
        }
        Ok((sql, params))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
