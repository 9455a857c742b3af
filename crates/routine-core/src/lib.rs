//! # Routine Core Library
//!
//! A recurring-session rule engine: declarative rules describe when sessions
//! repeat (daily, weekly, monthly, annually), and the engine computes their
//! occurrences, applies per-occurrence exceptions, and retires rules whose
//! bounded windows are fully resolved.
//!
//! ## Features
//!
//! - **Wall-Clock Recurrence**: Deterministic occurrence arithmetic over naive
//!   local time, with clamped month-end handling (a day-31 rule fires on
//!   Feb 29/28 and returns to the 31st)
//! - **Weekday Patterns**: Multi-weekday weekly rules and first/last
//!   weekday-of-month monthly patterns
//! - **Bounded Walks**: Every occurrence scan is iteration-capped, so a
//!   degenerate rule can never hang a caller
//! - **Local-First Persistence**: Rules stay usable under pending local ids
//!   when the backend is unreachable, and converge on the next sync
//! - **Auto-Retirement**: Bounded rules whose every occurrence is confirmed,
//!   skipped, or rescheduled are deleted automatically
//!
//! ## Core Modules
//!
//! - [`calendar`]: Date/time helpers (month lengths, weekday indices, clamped
//!   month arithmetic)
//! - [`recurrence`]: Day matching, forward walks, and end-boundary derivation
//! - [`resolver`]: Occurrence-disposition snapshots and window resolution
//! - [`models`]: Core data structures and normalization
//! - [`repository`]: Data access layer with the Repository pattern
//! - [`manager`]: Rule lifecycle operations and sync
//! - [`cache`]: Injected per-user rule cache
//! - [`lock`]: Advisory locking for sync mutual exclusion
//! - [`db`]: Database connection and migration management
//! - [`error`]: Error types
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use routine_core::{
//!     db, lock::InMemoryAdvisoryLock, manager::RoutineManager,
//!     repository::SqliteRepository,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = db::establish_connection("routines.db").await?;
//!     let repo = SqliteRepository::new(pool);
//!     let manager = RoutineManager::new(repo, Arc::new(InMemoryAdvisoryLock::new()));
//!
//!     let rules = manager.sync_rules("user-1").await?;
//!     println!("{} rules", rules.len());
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod calendar;
pub mod db;
pub mod error;
pub mod lock;
pub mod manager;
pub mod models;
pub mod recurrence;
pub mod repository;
pub mod resolver;
pub mod timezone;
