//! # Database
//!
//! PostgreSQL connection pooling with bounded connect retry, schema
//! migrations embedded from `migrations/`, and a health probe.

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::run_migrations;
