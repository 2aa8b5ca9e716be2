//! Database and credential storage.
//!
//! This module provides the storage layer for the poller, including:
//!
//! - SQLite database for inboxes, threads, purchase orders and downstream rows
//! - OS keychain integration for refresh tokens
//! - Async-safe database operations via tokio::task::spawn_blocking

mod database;
mod keychain;
pub mod queries;
mod schema;

pub use database::{Database, DatabaseError, Result};
pub use keychain::{KeychainAccess, KeychainError};
