//! Tally Core - Time-Bucketed Counters over Batched Wide-Column Writes
//!
//! Maintains rolling statistics (event counts, sums, sums of squares) for
//! named metrics across several time granularities at once, and writes them
//! as single atomic batches to a replicated store.
//!
//! # Architecture
//!
//! - **Mutation builder** ([`mutation`]): accumulates inserts, deletes and
//!   counter updates and renders them as one logged or unlogged batch
//! - **Consistency** ([`Consistency`]): replica acknowledgments required per write
//! - **Counters** ([`counting`]): fans one event out into every time bucket
//! - **Sessions** ([`session`]): the storage contract and an in-memory backend
//! - **Locks** ([`locking`]): named mutual exclusion and lock stacks
//! - **Log layer** ([`appender`]): stores `tracing` events through the builder
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tally_core::counting::{CounterOptions, CounterService};
//! use tally_core::session::{Keyspace, MemorySession, MemorySessionConfig};
//!
//! let session = Arc::new(MemorySession::new(MemorySessionConfig::default())?);
//! let keyspace = Keyspace::new("stats", session)?;
//! let counters = CounterService::new(keyspace, CounterOptions::default())?;
//!
//! counters.counter("signups")?.update_now(Some(5))?;
//! # Ok::<(), tally_core::TallyError>(())
//! ```

pub mod appender;
pub mod config;
pub mod counting;
pub mod locking;
pub mod mutation;
pub mod session;

mod consistency;
mod error;
mod types;

pub use consistency::Consistency;
pub use error::{Result, TallyError};
pub use types::*;

/// Tally version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
