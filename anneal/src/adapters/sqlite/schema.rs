use rusqlite::{params, Connection, TransactionBehavior};
use tracing::info;

use crate::types::error::{AnnealError, Result};

/// Ordered schema migrations. Entry `i` brings the schema to version `i + 1`.
const MIGRATIONS: &[&str] = &[MIGRATION_001];

const MIGRATION_001: &str = "
    -- Per-account state tokens for incremental sync
    CREATE TABLE IF NOT EXISTS sync_state (
        account_id      TEXT PRIMARY KEY,
        mailbox_state   TEXT NOT NULL DEFAULT '',
        email_state     TEXT NOT NULL DEFAULT '',
        last_sync       INTEGER NOT NULL        -- unix epoch seconds
    );

    -- Remote folders
    CREATE TABLE IF NOT EXISTS mailboxes (
        id              TEXT NOT NULL,
        account_id      TEXT NOT NULL,
        name            TEXT NOT NULL,
        role            TEXT,                   -- inbox, drafts, sent, trash, archive, junk
        parent_id       TEXT,
        total_emails    INTEGER NOT NULL DEFAULT 0,
        unread_count    INTEGER NOT NULL DEFAULT 0,
        sort_order      INTEGER NOT NULL DEFAULT 0,
        updated_at      INTEGER NOT NULL,
        PRIMARY KEY (account_id, id)
    );

    -- Message summaries (metadata only)
    CREATE TABLE IF NOT EXISTS emails (
        id              TEXT PRIMARY KEY,
        account_id      TEXT NOT NULL,
        thread_id       TEXT NOT NULL DEFAULT '',
        subject         TEXT NOT NULL DEFAULT '',
        preview         TEXT NOT NULL DEFAULT '',
        from_json       TEXT NOT NULL DEFAULT '[]',
        to_json         TEXT NOT NULL DEFAULT '[]',
        cc_json         TEXT NOT NULL DEFAULT '[]',
        reply_to_json   TEXT NOT NULL DEFAULT '[]',
        received_at     INTEGER NOT NULL,       -- unix epoch seconds
        size            INTEGER NOT NULL DEFAULT 0,
        is_unread       INTEGER NOT NULL DEFAULT 1,
        is_flagged      INTEGER NOT NULL DEFAULT 0,
        is_draft        INTEGER NOT NULL DEFAULT 0,
        has_attachment  INTEGER NOT NULL DEFAULT 0,
        updated_at      INTEGER NOT NULL
    );

    -- Current email <-> mailbox membership
    CREATE TABLE IF NOT EXISTS email_mailboxes (
        email_id        TEXT NOT NULL,
        mailbox_id      TEXT NOT NULL,
        PRIMARY KEY (email_id, mailbox_id)
    );

    -- Lazily fetched bodies, purgeable on their own
    CREATE TABLE IF NOT EXISTS email_bodies (
        email_id        TEXT PRIMARY KEY,
        text_body       TEXT NOT NULL DEFAULT '',
        html_body       TEXT NOT NULL DEFAULT '',
        attachments_json TEXT NOT NULL DEFAULT '[]',
        fetched_at      INTEGER NOT NULL        -- unix epoch seconds
    );

    CREATE INDEX IF NOT EXISTS idx_mailboxes_account       ON mailboxes(account_id);
    CREATE INDEX IF NOT EXISTS idx_emails_account          ON emails(account_id);
    CREATE INDEX IF NOT EXISTS idx_emails_thread           ON emails(thread_id, received_at);
    CREATE INDEX IF NOT EXISTS idx_emails_received         ON emails(received_at DESC);
    CREATE INDEX IF NOT EXISTS idx_email_mailboxes_mailbox ON email_mailboxes(mailbox_id);
    CREATE INDEX IF NOT EXISTS idx_email_bodies_fetched    ON email_bodies(fetched_at);
";

/// Current schema version of a database (0 for a fresh file)
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version as u32)
}

/// Bring the schema up to date. Each migration commits together with its
/// version row, so an interrupted run resumes where it stopped.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )?;

    let current = schema_version(conn)? as usize;

    for (index, migration) in MIGRATIONS.iter().enumerate().skip(current) {
        let version = index + 1;
        info!("Applying cache schema migration {}", version);

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(migration).map_err(|e| {
            AnnealError::Database(format!("Migration {} failed: {}", version, e))
        })?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![version as i64],
        )?;
        tx.commit()?;
    }

    Ok(())
}
