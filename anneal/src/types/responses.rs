//! Result types handed back to the UI layer
//!
//! These are the values carried by loader return values and loader events.
//! They should stay lean and contain only what the UI needs.

use serde::{Deserialize, Serialize};

// ============================================================================
// Load Results
// ============================================================================

/// Data returned by a load, tagged with where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loaded<T> {
    pub data: T,
    pub from_cache: bool,
}

impl<T> Loaded<T> {
    pub fn cached(data: T) -> Self {
        Self {
            data,
            from_cache: true,
        }
    }

    pub fn network(data: T) -> Self {
        Self {
            data,
            from_cache: false,
        }
    }
}

// ============================================================================
// Sync Results
// ============================================================================

/// Per-entity-type change counts of one sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub created: usize,
    pub updated: usize,
    pub destroyed: usize,
}

impl SyncCounts {
    pub fn has_changes(&self) -> bool {
        self.created > 0 || self.updated > 0 || self.destroyed > 0
    }
}

/// Outcome of one sync cycle for an account.
///
/// Remote failures are not fatal for the cycle: they are recorded in
/// `error` and the counts for the failed entity type stay at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub account_id: String,
    pub mailboxes: SyncCounts,
    /// `None` when the cycle did not cover emails
    pub emails: Option<SyncCounts>,
    pub error: Option<String>,
}

impl SyncReport {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            ..Default::default()
        }
    }

    pub fn mailboxes_changed(&self) -> bool {
        self.mailboxes.has_changes()
    }

    pub fn emails_changed(&self) -> bool {
        self.emails.map(|c| c.has_changes()).unwrap_or(false)
    }

    pub fn has_changes(&self) -> bool {
        self.mailboxes_changed() || self.emails_changed()
    }
}
