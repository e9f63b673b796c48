//! Mutation builder

use super::policy::{resolve, NullPolicy, WriteOptions};
use super::{Batch, Mutation, MutationKind};
use crate::session::{ExecutionMode, Keyspace};
use crate::{types, Consistency, Result, RowKey, TallyError, Value};
use std::fmt;
use tracing::debug;

/// Builder-wide defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutatorOptions {
    /// Consistency for mutations that do not name one
    pub default_consistency: Option<Consistency>,
    /// TTL for inserts that do not name one
    pub default_ttl: Option<u32>,
    /// What inserts do with absent values
    pub null_policy: NullPolicy,
    /// Logged (all-or-nothing) or unlogged batch
    pub atomic: bool,
    /// How `execute` hands the batch to the session
    pub mode: ExecutionMode,
}

impl Default for MutatorOptions {
    fn default() -> Self {
        Self {
            default_consistency: None,
            default_ttl: None,
            null_policy: NullPolicy::Error,
            atomic: true,
            mode: ExecutionMode::Synchronous,
        }
    }
}

impl MutatorOptions {
    /// Set the default consistency
    pub fn consistency(mut self, level: Consistency) -> Self {
        self.default_consistency = Some(level);
        self
    }

    /// Set the default TTL in seconds
    pub fn ttl(mut self, seconds: u32) -> Self {
        self.default_ttl = Some(seconds);
        self
    }

    /// Set the null policy
    pub fn null_policy(mut self, policy: NullPolicy) -> Self {
        self.null_policy = policy;
        self
    }

    /// Choose logged or unlogged batches
    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    /// Set the execution mode
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Accumulates mutations and executes them as one batch
pub struct Mutator {
    keyspace: Keyspace,
    options: MutatorOptions,
    mutations: Vec<Mutation>,
}

impl Mutator {
    /// Create a mutator bound to a keyspace.
    ///
    /// Fails with a configuration error if atomic batches are requested from
    /// a session that cannot apply them all-or-nothing.
    pub fn new(keyspace: Keyspace, options: MutatorOptions) -> Result<Self> {
        if options.atomic && !keyspace.session().supports_atomic_batches() {
            return Err(TallyError::Config(
                "Atomic batches requested but the session does not support them".into(),
            ));
        }
        Ok(Self {
            keyspace,
            options,
            mutations: Vec::new(),
        })
    }

    /// Insert a single column value using the builder defaults
    pub fn insert_column(
        &mut self,
        table: &str,
        key: impl Into<RowKey>,
        column: &str,
        value: Option<Value>,
    ) -> Result<&mut Self> {
        self.insert_column_with(table, key, column, value, WriteOptions::default())
    }

    /// Insert a single column value.
    ///
    /// An absent value is handled by the null policy: `Error` fails and
    /// appends nothing, `Delete` appends a column delete, `Ignore` appends
    /// nothing.
    pub fn insert_column_with(
        &mut self,
        table: &str,
        key: impl Into<RowKey>,
        column: &str,
        value: Option<Value>,
        options: WriteOptions,
    ) -> Result<&mut Self> {
        let key = checked_key(table, key.into(), Some(column))?;

        let value = match (value, self.options.null_policy) {
            (Some(value), _) => value,
            (None, NullPolicy::Error) => {
                return Err(TallyError::NullValue {
                    table: table.to_string(),
                    column: column.to_string(),
                })
            }
            (None, NullPolicy::Delete) => {
                let kind = MutationKind::DeleteColumn {
                    column: column.into(),
                };
                self.push(table, key, kind, options.consistency, None);
                return Ok(self);
            }
            (None, NullPolicy::Ignore) => return Ok(self),
        };

        let ttl = resolve(options.ttl, self.options.default_ttl);
        self.push(
            table,
            key,
            MutationKind::Insert {
                column: column.into(),
                value,
            },
            options.consistency,
            ttl,
        );
        Ok(self)
    }

    /// Delete a single column
    pub fn delete_column(
        &mut self,
        table: &str,
        key: impl Into<RowKey>,
        column: &str,
    ) -> Result<&mut Self> {
        self.delete_column_with(table, key, column, None)
    }

    /// Delete a single column at an explicit consistency
    pub fn delete_column_with(
        &mut self,
        table: &str,
        key: impl Into<RowKey>,
        column: &str,
        consistency: Option<Consistency>,
    ) -> Result<&mut Self> {
        let key = checked_key(table, key.into(), Some(column))?;
        let kind = MutationKind::DeleteColumn {
            column: column.into(),
        };
        self.push(table, key, kind, consistency, None);
        Ok(self)
    }

    /// Delete every row matching the key
    pub fn delete_row(&mut self, table: &str, key: impl Into<RowKey>) -> Result<&mut Self> {
        self.delete_row_with(table, key, None)
    }

    /// Delete every row matching the key at an explicit consistency
    pub fn delete_row_with(
        &mut self,
        table: &str,
        key: impl Into<RowKey>,
        consistency: Option<Consistency>,
    ) -> Result<&mut Self> {
        let key = checked_key(table, key.into(), None)?;
        self.push(table, key, MutationKind::DeleteRow, consistency, None);
        Ok(self)
    }

    /// Add `delta` to a counter column
    pub fn increment_counter_column(
        &mut self,
        table: &str,
        key: impl Into<RowKey>,
        counter: &str,
        delta: i64,
    ) -> Result<&mut Self> {
        self.increment_counter_column_with(table, key, counter, delta, None)
    }

    /// Add `delta` to a counter column at an explicit consistency
    pub fn increment_counter_column_with(
        &mut self,
        table: &str,
        key: impl Into<RowKey>,
        counter: &str,
        delta: i64,
        consistency: Option<Consistency>,
    ) -> Result<&mut Self> {
        let key = checked_key(table, key.into(), Some(counter))?;
        self.push(
            table,
            key,
            MutationKind::IncrementCounter {
                column: counter.into(),
                delta,
            },
            consistency,
            None,
        );
        Ok(self)
    }

    /// Subtract `delta` from a counter column
    pub fn decrement_counter_column(
        &mut self,
        table: &str,
        key: impl Into<RowKey>,
        counter: &str,
        delta: i64,
    ) -> Result<&mut Self> {
        self.decrement_counter_column_with(table, key, counter, delta, None)
    }

    /// Subtract `delta` from a counter column at an explicit consistency
    pub fn decrement_counter_column_with(
        &mut self,
        table: &str,
        key: impl Into<RowKey>,
        counter: &str,
        delta: i64,
        consistency: Option<Consistency>,
    ) -> Result<&mut Self> {
        let key = checked_key(table, key.into(), Some(counter))?;
        self.push(
            table,
            key,
            MutationKind::DecrementCounter {
                column: counter.into(),
                delta,
            },
            consistency,
            None,
        );
        Ok(self)
    }

    fn push(
        &mut self,
        table: &str,
        key: RowKey,
        kind: MutationKind,
        consistency: Option<Consistency>,
        ttl: Option<u32>,
    ) {
        let consistency = Consistency::resolve(resolve(consistency, self.options.default_consistency));
        self.mutations.push(Mutation {
            table: table.to_string(),
            key,
            kind,
            consistency,
            ttl,
        });
    }

    /// Render the pending mutations as one batch statement
    pub fn render(&self) -> String {
        super::render_batch(self.keyspace.name(), &self.mutations, self.options.atomic)
    }

    /// Snapshot of the pending mutations as an executable batch
    pub fn batch(&self) -> Batch {
        Batch::new(
            self.keyspace.name().map(str::to_string),
            self.mutations.clone(),
            self.options.atomic,
            Consistency::resolve(self.options.default_consistency),
        )
    }

    /// Hand the batch to the session in this mutator's execution mode.
    ///
    /// Pending mutations are kept; executing twice writes twice.
    pub fn execute(&self) -> Result<()> {
        let batch = self.batch();
        let consistency = batch.consistency();
        debug!(
            "Submitting batch of {} mutations at {} ({:?})",
            batch.len(),
            consistency,
            self.options.mode
        );
        self.keyspace
            .session()
            .submit(batch, consistency, self.options.mode)
    }

    /// Pending mutations in insertion order
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Number of pending mutations
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Builder options
    pub fn options(&self) -> &MutatorOptions {
        &self.options
    }

    /// Keyspace the mutator writes to
    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }
}

impl fmt::Display for Mutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl fmt::Debug for Mutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutator")
            .field("keyspace", &self.keyspace.name())
            .field("options", &self.options)
            .field("mutations", &self.mutations.len())
            .finish()
    }
}

fn checked_key(table: &str, key: RowKey, column: Option<&str>) -> Result<RowKey> {
    types::validate_identifier("table", table)?;
    if let Some(column) = column {
        types::validate_identifier("column", column)?;
    }
    if key.is_empty() {
        return Err(TallyError::InvalidArgument(format!(
            "Row key for table {} has no columns",
            table
        )));
    }
    for (name, _) in key.columns() {
        types::validate_identifier("key column", name)?;
    }
    Ok(key)
}
