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

//! SQLite message store.

use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, Statement, ToSql};
use std::path::Path;
use tracing::{debug, info};

use super::{Cursor, DataStore, StoreConnection, StoreError, StoreStatement, Value};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS Message (
    handle TEXT PRIMARY KEY,
    transparent INTEGER NOT NULL DEFAULT 0,
    retry INTEGER NOT NULL DEFAULT 0,
    char_set INTEGER NOT NULL DEFAULT 1,
    body TEXT NOT NULL DEFAULT '',
    version TEXT NOT NULL DEFAULT '1.0',
    status TEXT NOT NULL DEFAULT 'UNREAD',
    type INTEGER NOT NULL,
    folder_path TEXT NOT NULL DEFAULT '',
    extended_data TEXT,
    part_id TEXT,
    encoding TEXT,
    content_charset TEXT,
    language TEXT,
    content_length INTEGER,
    conversation_id TEXT
);

CREATE TABLE IF NOT EXISTS MessageList (
    handle TEXT PRIMARY KEY,
    subject TEXT NOT NULL DEFAULT '',
    datetime TEXT NOT NULL DEFAULT '',
    sender_name TEXT NOT NULL DEFAULT '',
    sender_addressing TEXT NOT NULL DEFAULT '',
    replyto_addressing TEXT NOT NULL DEFAULT '',
    recipient_name TEXT NOT NULL DEFAULT '',
    recipient_addressing TEXT NOT NULL DEFAULT '',
    type INTEGER NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    text INTEGER NOT NULL DEFAULT 1,
    reception_status TEXT NOT NULL DEFAULT 'complete',
    attachment_size INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    read INTEGER NOT NULL DEFAULT 0,
    sent INTEGER NOT NULL DEFAULT 0,
    protected INTEGER NOT NULL DEFAULT 0,
    folder TEXT NOT NULL,
    delivery_status TEXT NOT NULL DEFAULT '',
    conversation_id TEXT NOT NULL DEFAULT '',
    conversation_name TEXT NOT NULL DEFAULT '',
    direction TEXT NOT NULL DEFAULT '',
    attachment_mime_types TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_message_list_datetime ON MessageList(datetime DESC);

CREATE TABLE IF NOT EXISTS Vcard (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    handle TEXT NOT NULL,
    is_originator INTEGER NOT NULL,
    version TEXT NOT NULL DEFAULT '2.1',
    name TEXT NOT NULL DEFAULT '',
    formatted_name TEXT NOT NULL DEFAULT '',
    phone_numbers TEXT NOT NULL DEFAULT '',
    email_addresses TEXT NOT NULL DEFAULT '',
    x_bt_uid TEXT NOT NULL DEFAULT '',
    x_bt_ucis TEXT NOT NULL DEFAULT '',
    env_level INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_vcard_handle ON Vcard(handle);

CREATE TABLE IF NOT EXISTS Conversation (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    convo_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL DEFAULT '',
    last_activity TEXT NOT NULL DEFAULT '',
    read_status INTEGER NOT NULL DEFAULT 0,
    version_counter TEXT NOT NULL DEFAULT '',
    summary TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS Participant (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    convo_id TEXT NOT NULL,
    uci TEXT NOT NULL DEFAULT '',
    display_name TEXT NOT NULL DEFAULT '',
    chat_state TEXT NOT NULL DEFAULT '',
    last_activity TEXT NOT NULL DEFAULT '',
    x_bt_uid TEXT NOT NULL DEFAULT '',
    name TEXT NOT NULL DEFAULT '',
    presence_availability TEXT NOT NULL DEFAULT '',
    presence_text TEXT NOT NULL DEFAULT '',
    priority TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS Folder (
    id INTEGER PRIMARY KEY,
    parent_id INTEGER NOT NULL,
    name TEXT NOT NULL
);
";

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Int(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Int(v as i64),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

/// Message store backed by a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open the store database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{:?}: {}", parent, e)))?;
        }
        info!("Opening message store: {:?}", path);
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run raw SQL against the store, for seeding and maintenance.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}

impl DataStore for SqliteStore {
    fn connect(&self) -> Result<Box<dyn StoreConnection + '_>, StoreError> {
        Ok(Box::new(SqliteConnection {
            conn: self.conn.lock(),
        }))
    }
}

struct SqliteConnection<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl StoreConnection for SqliteConnection<'_> {
    fn prepare<'s>(&'s self, sql: &str) -> Result<Box<dyn StoreStatement + 's>, StoreError> {
        debug!("prepare: {}", sql);
        let stmt = self.conn.prepare(sql)?;
        Ok(Box::new(SqliteStatement {
            stmt,
            values: Vec::new(),
        }))
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

struct SqliteStatement<'c> {
    stmt: Statement<'c>,
    values: Vec<Value>,
}

impl StoreStatement for SqliteStatement<'_> {
    fn bind(&mut self, index: usize, value: Value) {
        if index == 0 {
            return;
        }
        if self.values.len() < index {
            self.values.resize(index, Value::Null);
        }
        self.values[index - 1] = value;
    }

    fn clear_bindings(&mut self) {
        self.values.clear();
    }

    fn query(&mut self) -> Result<Cursor, StoreError> {
        let column_count = self.stmt.column_count();
        let mut rows = self.stmt.query(params_from_iter(self.values.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(from_value_ref(row.get_ref(i)?));
            }
            out.push(values);
        }
        Ok(Cursor::new(out))
    }

    fn execute(&mut self) -> Result<usize, StoreError> {
        Ok(self.stmt.execute(params_from_iter(self.values.iter()))?)
    }
}
