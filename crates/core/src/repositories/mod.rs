//! Persistence services for the lab.
//!
//! Each service wraps a [`Database`](crate::db::Database) handle. Operations
//! that must take part in a wider transaction (cloning, order totals) are
//! plain functions over a `SqliteConnection` instead.

pub mod billing;
pub mod cloning;
pub mod exams;
pub mod orders;
pub mod patients;
pub mod queue;
