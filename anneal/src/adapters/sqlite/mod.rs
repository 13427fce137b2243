//! SQLite persistent store for the mail cache
//!
//! The database is a cache of server state: everything in it can be
//! rebuilt from the remote. Every bulk write runs in a single transaction
//! so readers never observe a half-applied replace.

pub mod pool;
pub mod schema;

mod bodies;
mod emails;
mod mailboxes;
mod sync_state;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::info;

use crate::types::error::Result;

pub use pool::{DbConnection, DbPool};

/// Handle to the local cache database.
///
/// Constructed once at startup and shared (behind an `Arc`) by the syncer
/// and the loader.
pub struct Store {
    pool: DbPool,
}

impl Store {
    /// Open (or create) the cache at `path` and bring its schema up to date
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening mail cache at: {:?}", path);
        let pool = pool::create_pool(path)?;
        Self::with_pool(pool)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_pool(pool::create_memory_pool()?)
    }

    fn with_pool(pool: DbPool) -> Result<Self> {
        {
            let mut conn = pool.get()?;
            schema::initialize_schema(&mut conn)?;
        }
        Ok(Self { pool })
    }

    /// Flush the write-ahead log and release every pooled connection
    pub fn close(self) -> Result<()> {
        {
            let conn = self.connection()?;
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        drop(self.pool);
        info!("Mail cache closed");
        Ok(())
    }

    /// Get a connection from the pool
    pub(crate) fn connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Delete every cached row, sync state included. Used for a full reset.
    pub fn clear_cache(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for table in ["email_bodies", "email_mailboxes", "emails", "mailboxes", "sync_state"] {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        tx.commit()?;
        info!("Mail cache cleared");
        Ok(())
    }
}

// ========== Column helpers ==========

pub(crate) fn to_unix(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp()
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a JSON text column; NULL decodes to the type's default
pub(crate) fn json_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: DeserializeOwned + Default,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(text) if !text.is_empty() => serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        _ => Ok(T::default()),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};

    use crate::types::{EmailAddress, EmailSummary, Mailbox, MailboxRole};

    pub const ACCOUNT: &str = "u1234";

    pub fn mailbox(id: &str, name: &str, role: Option<MailboxRole>, sort_order: u32) -> Mailbox {
        Mailbox {
            id: id.to_string(),
            account_id: ACCOUNT.to_string(),
            name: name.to_string(),
            role,
            parent_id: None,
            total_count: 10,
            unread_count: 2,
            sort_order,
            updated_at: None,
        }
    }

    /// Summary received `minute` minutes after a fixed epoch
    pub fn email(id: &str, thread_id: &str, mailbox_ids: &[&str], minute: u32) -> EmailSummary {
        let mut mailbox_ids: Vec<String> = mailbox_ids.iter().map(|s| s.to_string()).collect();
        mailbox_ids.sort();
        EmailSummary {
            id: id.to_string(),
            account_id: ACCOUNT.to_string(),
            thread_id: thread_id.to_string(),
            mailbox_ids,
            subject: format!("Subject {}", id),
            preview: format!("Preview of {}", id),
            from: vec![EmailAddress::new("Alice", "alice@example.com")],
            to: vec![EmailAddress::new("", "me@example.com")],
            cc: vec![],
            reply_to: vec![],
            received_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap(),
            size_bytes: 2048,
            is_unread: true,
            is_flagged: false,
            is_draft: false,
            has_attachment: false,
            updated_at: None,
        }
    }

    /// Drop the store-assigned timestamp so records compare by content
    pub fn strip_mailbox(mut mailbox: Mailbox) -> Mailbox {
        mailbox.updated_at = None;
        mailbox
    }

    pub fn strip_email(mut email: EmailSummary) -> EmailSummary {
        email.updated_at = None;
        email
    }
}
