//! # parley-store
//!
//! Local storage for peers and their message logs, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model. Callers share it behind a mutex and never hold the lock across an
//! await point.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod peers;

mod columns;
mod error;

pub use database::{default_data_dir, Database};
pub use error::{Result, StoreError};
pub use models::*;
