//! Reconciliation between the local cache and the remote server
//!
//! The [`Syncer`] decides between full and incremental sync per entity
//! type, applies the result to the store and reports what changed.

mod syncer;

pub use syncer::Syncer;
