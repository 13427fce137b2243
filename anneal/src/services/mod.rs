//! Application services
//!
//! This module contains the policy layer the UI talks to, plus process-wide
//! helpers. Services should:
//! - Take their collaborators explicitly (no globals)
//! - Use AnnealError for error handling
//! - Be easily testable in isolation

pub mod loader;
pub mod logger;

pub use loader::{Loader, LoaderEvent, LoaderSettings};
