use chrono::Utc;
use rusqlite::{params, Connection, Row, TransactionBehavior};
use tracing::debug;

use super::{from_unix, Store};
use crate::types::error::Result;
use crate::types::{Mailbox, MailboxRole};

const MAILBOX_COLUMNS: &str = "id, account_id, name, role, parent_id, total_emails, unread_count, sort_order, updated_at";

impl Store {
    /// All mailboxes of an account, by sort order then name
    pub fn get_mailboxes(&self, account_id: &str) -> Result<Vec<Mailbox>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mailboxes WHERE account_id = ?1 ORDER BY sort_order, name",
            MAILBOX_COLUMNS
        ))?;

        let rows = stmt.query_map(params![account_id], row_to_mailbox)?;

        let mut mailboxes = Vec::new();
        for row in rows {
            mailboxes.push(row?);
        }
        Ok(mailboxes)
    }

    /// Replace the whole mailbox set of an account.
    ///
    /// Delete-all then insert-all inside one transaction: on any failure the
    /// previous set stays visible.
    pub fn save_mailboxes(&self, account_id: &str, mailboxes: &[Mailbox]) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute("DELETE FROM mailboxes WHERE account_id = ?1", params![account_id])?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO mailboxes ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                MAILBOX_COLUMNS
            ))?;
            let now = Utc::now().timestamp();
            for mailbox in mailboxes {
                stmt.execute(params![
                    mailbox.id,
                    account_id,
                    mailbox.name,
                    mailbox.role.map(|r| r.as_str()),
                    mailbox.parent_id,
                    mailbox.total_count,
                    mailbox.unread_count,
                    mailbox.sort_order,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        debug!("Replaced mailboxes for {}: {} rows", account_id, mailboxes.len());
        Ok(())
    }

    /// Idempotent upsert of one mailbox
    pub fn update_mailbox(&self, account_id: &str, mailbox: &Mailbox) -> Result<()> {
        let conn = self.connection()?;
        upsert_mailbox(&conn, account_id, mailbox)
    }

    /// Remove one mailbox and every membership pointing at it. Summaries
    /// stay; they may still belong to other mailboxes. Returns whether a
    /// mailbox row existed.
    pub fn delete_mailbox(&self, mailbox_id: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute("DELETE FROM mailboxes WHERE id = ?1", params![mailbox_id])?;
        let memberships = tx.execute(
            "DELETE FROM email_mailboxes WHERE mailbox_id = ?1",
            params![mailbox_id],
        )?;
        tx.commit()?;
        debug!("Deleted mailbox {} and {} memberships", mailbox_id, memberships);
        Ok(deleted > 0)
    }
}

fn upsert_mailbox(conn: &Connection, account_id: &str, mailbox: &Mailbox) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO mailboxes ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(account_id, id) DO UPDATE SET
                name = excluded.name,
                role = excluded.role,
                parent_id = excluded.parent_id,
                total_emails = excluded.total_emails,
                unread_count = excluded.unread_count,
                sort_order = excluded.sort_order,
                updated_at = excluded.updated_at",
            MAILBOX_COLUMNS
        ),
        params![
            mailbox.id,
            account_id,
            mailbox.name,
            mailbox.role.map(|r| r.as_str()),
            mailbox.parent_id,
            mailbox.total_count,
            mailbox.unread_count,
            mailbox.sort_order,
            Utc::now().timestamp(),
        ],
    )?;
    Ok(())
}

fn row_to_mailbox(row: &Row) -> rusqlite::Result<Mailbox> {
    Ok(Mailbox {
        id: row.get(0)?,
        account_id: row.get(1)?,
        name: row.get(2)?,
        role: row
            .get::<_, Option<String>>(3)?
            .and_then(|role| MailboxRole::parse(&role)),
        parent_id: row.get(4)?,
        total_count: row.get(5)?,
        unread_count: row.get(6)?,
        sort_order: row.get(7)?,
        updated_at: Some(from_unix(row.get(8)?)),
    })
}
