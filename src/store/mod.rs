// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Message store access.
//!
//! The engine talks to its backing store through prepared statements with
//! positional binds and a materialized result cursor. `sqlite` provides the
//! shipped backend.

pub mod sqlite;

use thiserror::Error;

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("No rows affected: {0}")]
    Unchanged(String),

    #[error("Store error: {0}")]
    Backend(String),
}

/// A value bound to a statement or read from a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Fully materialized query result.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    rows: Vec<Vec<Value>>,
    position: Option<usize>,
}

impl Cursor {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows,
            position: None,
        }
    }

    /// Advance to the next row. Returns false once the rows are exhausted.
    pub fn next_row(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.rows.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.rows.len());
            false
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn column(&self, index: usize) -> &Value {
        self.position
            .and_then(|p| self.rows.get(p))
            .and_then(|row| row.get(index))
            .unwrap_or(&Value::Null)
    }

    pub fn get_int64(&self, index: usize) -> i64 {
        match self.column(index) {
            Value::Int(v) => *v,
            Value::Text(s) => s.trim().parse().unwrap_or(0),
            Value::Null => 0,
        }
    }

    pub fn get_int(&self, index: usize) -> i32 {
        self.get_int64(index) as i32
    }

    /// Column as text; NULL reads as the empty string.
    pub fn get_string(&self, index: usize) -> String {
        match self.column(index) {
            Value::Text(s) => s.clone(),
            Value::Int(v) => v.to_string(),
            Value::Null => String::new(),
        }
    }

    pub fn is_not_null(&self, index: usize) -> bool {
        !matches!(self.column(index), Value::Null)
    }
}

/// A prepared statement with 1-based positional binds.
pub trait StoreStatement {
    fn bind(&mut self, index: usize, value: Value);

    /// Drop all bound values.
    fn clear_bindings(&mut self);

    fn query(&mut self) -> Result<Cursor, StoreError>;

    /// Run an insert, update or delete. Returns the affected row count.
    fn execute(&mut self) -> Result<usize, StoreError>;
}

/// One open connection to the store.
pub trait StoreConnection {
    fn prepare<'s>(&'s self, sql: &str) -> Result<Box<dyn StoreStatement + 's>, StoreError>;

    fn begin(&self) -> Result<(), StoreError>;

    fn commit(&self) -> Result<(), StoreError>;

    fn rollback(&self) -> Result<(), StoreError>;
}

/// Source of store connections.
pub trait DataStore: Send + Sync {
    fn connect(&self) -> Result<Box<dyn StoreConnection + '_>, StoreError>;
}

/// Prepare `sql`, bind `values` in order, and run it as a query.
pub fn query(
    conn: &dyn StoreConnection,
    sql: &str,
    values: &[Value],
) -> Result<Cursor, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    for (i, v) in values.iter().enumerate() {
        stmt.bind(i + 1, v.clone());
    }
    stmt.query()
}

/// Prepare `sql`, bind `values` in order, and execute it.
pub fn execute(
    conn: &dyn StoreConnection,
    sql: &str,
    values: &[Value],
) -> Result<usize, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    for (i, v) in values.iter().enumerate() {
        stmt.bind(i + 1, v.clone());
    }
    stmt.execute()
}

/// Execute and require exactly one affected row.
pub fn execute_one(
    conn: &dyn StoreConnection,
    sql: &str,
    values: &[Value],
) -> Result<(), StoreError> {
    match execute(conn, sql, values)? {
        1 => Ok(()),
        n => Err(StoreError::Unchanged(format!("{} rows affected by: {}", n, sql))),
    }
}

/// Run `f` inside begin/commit, rolling back if any step fails.
pub fn transaction<T, E>(
    conn: &dyn StoreConnection,
    f: impl FnOnce(&dyn StoreConnection) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<StoreError>,
{
    conn.begin()?;
    match f(conn) {
        Ok(value) => match conn.commit() {
            Ok(()) => Ok(value),
            Err(commit_err) => {
                if let Err(rollback_err) = conn.rollback() {
                    tracing::error!("Rollback after failed commit failed: {}", rollback_err);
                }
                Err(commit_err.into())
            }
        },
        Err(e) => {
            if let Err(rollback_err) = conn.rollback() {
                tracing::error!("Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_iteration() {
        let mut cursor = Cursor::new(vec![
            vec![Value::Int(7), Value::Text("a".into()), Value::Null],
            vec![Value::Int(8), Value::Text("12".into()), Value::Null],
        ]);

        // No current row yet.
        assert_eq!(cursor.get_int(0), 0);

        assert!(cursor.next_row());
        assert_eq!(cursor.get_int(0), 7);
        assert_eq!(cursor.get_string(1), "a");
        assert!(!cursor.is_not_null(2));
        assert_eq!(cursor.get_string(2), "");

        assert!(cursor.next_row());
        assert_eq!(cursor.get_int64(1), 12);
        assert_eq!(cursor.get_string(0), "8");

        assert!(!cursor.next_row());
        assert!(!cursor.next_row());
    }

    /// Connection that records transaction calls and refuses to commit.
    #[derive(Default)]
    struct CommitFails {
        calls: std::cell::RefCell<Vec<&'static str>>,
    }

    impl StoreConnection for CommitFails {
        fn prepare<'s>(&'s self, sql: &str) -> Result<Box<dyn StoreStatement + 's>, StoreError> {
            Err(StoreError::Backend(format!("unexpected prepare: {}", sql)))
        }

        fn begin(&self) -> Result<(), StoreError> {
            self.calls.borrow_mut().push("begin");
            Ok(())
        }

        fn commit(&self) -> Result<(), StoreError> {
            self.calls.borrow_mut().push("commit");
            Err(StoreError::Backend("database is locked".into()))
        }

        fn rollback(&self) -> Result<(), StoreError> {
            self.calls.borrow_mut().push("rollback");
            Ok(())
        }
    }

    #[test]
    fn test_failed_commit_rolls_back() {
        let conn = CommitFails::default();
        let result: Result<u32, StoreError> = transaction(&conn, |_| Ok(5));
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(*conn.calls.borrow(), vec!["begin", "commit", "rollback"]);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(true), Value::Int(1));
        assert_eq!(Value::from("x"), Value::Text("x".into()));
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some(3i32)), Value::Int(3));
    }
}
