use rusqlite::{params, OptionalExtension, Row};

use super::{from_unix, to_unix, Store};
use crate::types::error::Result;
use crate::types::SyncState;

impl Store {
    pub fn get_sync_state(&self, account_id: &str) -> Result<Option<SyncState>> {
        let conn = self.connection()?;
        let state = conn
            .query_row(
                "SELECT account_id, mailbox_state, email_state, last_sync
                   FROM sync_state WHERE account_id = ?1",
                params![account_id],
                row_to_state,
            )
            .optional()?;
        Ok(state)
    }

    /// Every stored sync state, by account id
    pub fn list_sync_states(&self) -> Result<Vec<SyncState>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT account_id, mailbox_state, email_state, last_sync
               FROM sync_state ORDER BY account_id",
        )?;
        let rows = stmt.query_map([], row_to_state)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Upsert, replacing both tokens and the timestamp
    pub fn save_sync_state(&self, state: &SyncState) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO sync_state (account_id, mailbox_state, email_state, last_sync)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account_id) DO UPDATE SET
                mailbox_state = excluded.mailbox_state,
                email_state = excluded.email_state,
                last_sync = excluded.last_sync",
            params![
                state.account_id,
                state.mailbox_state,
                state.email_state,
                to_unix(&state.last_sync),
            ],
        )?;
        Ok(())
    }
}

fn row_to_state(row: &Row) -> rusqlite::Result<SyncState> {
    Ok(SyncState {
        account_id: row.get(0)?,
        mailbox_state: row.get(1)?,
        email_state: row.get(2)?,
        last_sync: from_unix(row.get(3)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_sync_state_absent_then_upserted() {
        let store = Store::in_memory().expect("Failed to create store");
        assert!(store.get_sync_state("u1").unwrap().is_none());

        let mut state = SyncState::new("u1");
        state.mailbox_state = "M1".to_string();
        state.last_sync = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        store.save_sync_state(&state).unwrap();
        assert_eq!(store.get_sync_state("u1").unwrap(), Some(state.clone()));

        state.mailbox_state = "M2".to_string();
        state.email_state = "E7".to_string();
        state.last_sync = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        store.save_sync_state(&state).unwrap();

        let loaded = store.get_sync_state("u1").unwrap().unwrap();
        assert_eq!(loaded.mailbox_state, "M2");
        assert_eq!(loaded.email_state, "E7");
        assert_eq!(loaded.last_sync, state.last_sync);
        assert!(store.get_sync_state("u2").unwrap().is_none());
    }

    #[test]
    fn test_list_sync_states() {
        let store = Store::in_memory().unwrap();
        store.save_sync_state(&SyncState::new("u2")).unwrap();
        store.save_sync_state(&SyncState::new("u1")).unwrap();

        let accounts: Vec<String> = store
            .list_sync_states()
            .unwrap()
            .into_iter()
            .map(|s| s.account_id)
            .collect();
        assert_eq!(accounts, vec!["u1", "u2"]);
    }
}
