//! Time-bucketed counters
//!
//! A counter update fans one event out into every [`Granularity`]: the event
//! count always, plus the value sum and sum of squares when a value is given.
//! All increments of one update go out as a single atomic batch.
//!
//! Rows are narrow, one counter cell per (name, kind, granularity, bucket):
//!
//! ```text
//! CREATE TABLE counters (
//!     name text, kind text, granularity text, time timestamp,
//!     value counter,
//!     PRIMARY KEY ((name), kind, granularity, time)
//! );
//! ```

mod granularity;

pub use granularity::{Granularity, ValueKind};

use crate::mutation::{Mutator, MutatorOptions, NullPolicy};
use crate::session::{ExecutionMode, Keyspace};
use crate::{types, Consistency, Result, RowKey, TallyError, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Name of the counter value column
pub const VALUE_COLUMN: &str = "value";

/// Counter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterOptions {
    /// Table holding counter rows
    pub table: String,
    /// Consistency of counter batches
    pub consistency: Consistency,
    /// How batches are handed to the session
    pub mode: ExecutionMode,
}

impl Default for CounterOptions {
    fn default() -> Self {
        Self {
            table: crate::config::DEFAULT_COUNTER_TABLE.to_string(),
            consistency: Consistency::Quorum,
            mode: ExecutionMode::Synchronous,
        }
    }
}

/// Creates counters bound to a keyspace and table
#[derive(Debug, Clone)]
pub struct CounterService {
    keyspace: Keyspace,
    options: CounterOptions,
}

impl CounterService {
    /// Create a counter factory
    pub fn new(keyspace: Keyspace, options: CounterOptions) -> Result<Self> {
        types::validate_identifier("table", &options.table)?;
        if !keyspace.session().supports_atomic_batches() {
            return Err(TallyError::Config(
                "Counters require a session with atomic batches".into(),
            ));
        }
        Ok(Self { keyspace, options })
    }

    /// Get a counter by name
    pub fn counter(&self, name: impl Into<String>) -> Result<Counter> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(TallyError::Config("Counter name must not be empty".into()));
        }
        Ok(Counter {
            name,
            keyspace: self.keyspace.clone(),
            options: self.options.clone(),
        })
    }

    /// Counter settings
    pub fn options(&self) -> &CounterOptions {
        &self.options
    }

    /// Start an empty batch with the counter settings, for [`Counter::append_update`]
    pub fn mutator(&self) -> Result<Mutator> {
        self.keyspace.mutator(mutator_options(&self.options))
    }
}

/// A named counter. Holds no state beyond its identity.
#[derive(Debug, Clone)]
pub struct Counter {
    name: String,
    keyspace: Keyspace,
    options: CounterOptions,
}

impl Counter {
    /// Counter name (partition key)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record one event at `timestamp`, with an optional value
    pub fn update(&self, timestamp: Timestamp, value: Option<i64>) -> Result<()> {
        let mut mutator = self.keyspace.mutator(mutator_options(&self.options))?;
        self.append_update(&mut mutator, timestamp, value)?;
        debug!(
            "Counter {} update at {} with {} increments",
            self.name,
            timestamp,
            mutator.len()
        );
        mutator.execute()
    }

    /// Record one event without a value
    pub fn update_at(&self, timestamp: Timestamp) -> Result<()> {
        self.update(timestamp, None)
    }

    /// Record one event now
    pub fn update_now(&self, value: Option<i64>) -> Result<()> {
        self.update(Utc::now(), value)
    }

    /// Append the increments of one update to a caller-owned batch.
    ///
    /// Nothing is appended if the squared value does not fit 64 bits.
    pub fn append_update(
        &self,
        mutator: &mut Mutator,
        timestamp: Timestamp,
        value: Option<i64>,
    ) -> Result<()> {
        let deltas = match value {
            Some(v) => {
                let square = v.checked_mul(v).ok_or_else(|| {
                    TallyError::InvalidArgument(format!(
                        "Square of {} overflows counter {}",
                        v, self.name
                    ))
                })?;
                vec![(ValueKind::Counts, 1), (ValueKind::Sums, v), (ValueKind::Squares, square)]
            }
            None => vec![(ValueKind::Counts, 1)],
        };

        for granularity in Granularity::ALL {
            let bucket = granularity.truncate(timestamp);
            for (kind, delta) in &deltas {
                mutator.increment_counter_column_with(
                    &self.options.table,
                    self.cell_key(*kind, granularity, bucket),
                    VALUE_COLUMN,
                    *delta,
                    Some(self.options.consistency),
                )?;
            }
        }
        Ok(())
    }

    /// Remove every bucket of this counter
    pub fn delete(&self) -> Result<()> {
        let mut mutator = self.keyspace.mutator(mutator_options(&self.options))?;
        mutator.delete_row_with(
            &self.options.table,
            RowKey::new("name", self.name.as_str()),
            Some(self.options.consistency),
        )?;
        debug!("Deleting counter {}", self.name);
        mutator.execute()
    }

    /// Primary key of one counter cell
    pub fn cell_key(&self, kind: ValueKind, granularity: Granularity, bucket: Timestamp) -> RowKey {
        RowKey::new("name", self.name.as_str())
            .and("kind", kind.code())
            .and("granularity", granularity.code())
            .and("time", bucket)
    }
}

fn mutator_options(options: &CounterOptions) -> MutatorOptions {
    MutatorOptions::default()
        .consistency(options.consistency)
        .null_policy(NullPolicy::Ignore)
        .atomic(true)
        .mode(options.mode)
}
