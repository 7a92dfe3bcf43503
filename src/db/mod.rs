//! Storage module for sitewatch.
//!
//! The `Store` trait is the persistence seam; the JSON-file and SQLite
//! backends are selected from configuration at startup.

mod json_store;
mod models;
mod sqlite_store;
mod store;

pub use json_store::*;
pub use models::*;
pub use sqlite_store::*;
pub use store::*;
