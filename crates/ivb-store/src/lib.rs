//! Read-only access to the invoice store.
//!
//! The broadcast engine only needs one thing from invoices: the set of chats
//! that have ever received one. Invoices are written by the billing side of
//! the system; this crate never mutates them.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use rusqlite::{types::Value, Connection, OpenFlags};

use ivb_core::{broadcast::ChatIdSource, domain::ChatId, Error, Result};

const DISTINCT_CHAT_IDS_SQL: &str =
    "SELECT DISTINCT chat_id FROM invoices WHERE chat_id IS NOT NULL";

pub struct InvoiceStore {
    conn: Arc<Mutex<Connection>>,
}

impl InvoiceStore {
    /// Open an existing invoice database read-only.
    ///
    /// A missing file is an error: broadcasting against an empty store would
    /// silently send to nobody.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::Store(format!("cannot open {}: {e}", path.display())))?;

        tracing::info!(path = %path.display(), "invoice store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn query_chat_ids(conn: &Connection) -> Result<Vec<ChatId>> {
    let mut stmt = conn
        .prepare(DISTINCT_CHAT_IDS_SQL)
        .map_err(|e| Error::Store(format!("prepare failed: {e}")))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, Value>(0))
        .map_err(|e| Error::Store(format!("query failed: {e}")))?;

    let mut out = Vec::new();
    for row in rows {
        let value = row.map_err(|e| Error::Store(format!("row read failed: {e}")))?;
        match chat_id_from_value(&value) {
            Some(id) => out.push(id),
            None => tracing::warn!(?value, "skipping invoice with unusable chat id"),
        }
    }

    // Integer 123 and text "123" are the same chat.
    let mut seen = std::collections::HashSet::new();
    out.retain(|id| seen.insert(id.clone()));
    Ok(out)
}

fn chat_id_from_value(value: &Value) -> Option<ChatId> {
    match value {
        Value::Integer(n) => Some(ChatId::Id(*n)),
        Value::Text(s) => ChatId::parse(s),
        Value::Real(f) if f.fract() == 0.0 => Some(ChatId::Id(*f as i64)),
        _ => None,
    }
}

#[async_trait]
impl ChatIdSource for InvoiceStore {
    async fn distinct_chat_ids(&self) -> Result<Vec<ChatId>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::Store("connection lock poisoned".to_string()))?;
            query_chat_ids(&guard)
        })
        .await
        .map_err(|e| Error::Store(format!("query task failed: {e}")))?
    }
}
