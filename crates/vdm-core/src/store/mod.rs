//! Persistent job store (SQLite via sqlx).
//!
//! Every operation touches a single row; the pipeline is the only writer of a
//! job's in-progress fields while it runs.

mod db;
mod jobs;

pub use db::JobDb;

#[cfg(test)]
pub(crate) use db::open_memory;
