//! Database module.
//!
//! Provides the SQLite history store behind the history sink and the
//! history/uptime read endpoints.

mod models;
mod store;

pub use models::*;
pub use store::*;
