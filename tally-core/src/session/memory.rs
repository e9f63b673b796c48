//! In-memory wide-column session
//!
//! Applies batches to process-local tables. Used by tests and by the
//! ingestion server when no external cluster is configured.
//!
//! - Logged (atomic) batches apply in place while recording the prior state
//!   of each touched row; a failing mutation restores those rows.
//! - Unlogged batches apply mutation by mutation; the first failure is
//!   reported after the remaining mutations were applied.
//! - Asynchronous batches are queued to a single worker thread.

use super::Session;
use crate::mutation::{Batch, Mutation, MutationKind};
use crate::{Consistency, Result, RowKey, TallyError, Value};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// In-memory session configuration
#[derive(Debug, Clone)]
pub struct MemorySessionConfig {
    /// Replicas per row
    pub replication_factor: usize,
    /// Whether logged batches are applied all-or-nothing
    pub atomic_batches: bool,
    /// Maximum queued asynchronous batches
    pub async_queue_capacity: usize,
    /// Number of executed batches kept for inspection
    pub history_limit: usize,
}

impl Default for MemorySessionConfig {
    fn default() -> Self {
        Self {
            replication_factor: crate::config::DEFAULT_REPLICATION_FACTOR,
            atomic_batches: true,
            async_queue_capacity: crate::config::DEFAULT_ASYNC_QUEUE_CAPACITY,
            history_limit: crate::config::DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// A stored cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Regular column value
    Value { value: Value, ttl: Option<u32> },
    /// Counter column
    Counter(i64),
}

#[derive(Debug, Clone)]
struct Row {
    key: RowKey,
    cells: BTreeMap<String, Cell>,
}

/// Canonical key literals of a row
type RowId = BTreeMap<String, String>;

type Table = BTreeMap<RowId, Row>;

/// Session statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub batches_executed: u64,
    pub batches_failed: u64,
    pub mutations_applied: u64,
    pub async_submitted: u64,
    pub async_failures: u64,
    pub tables: usize,
    pub rows: usize,
}

struct Job {
    batch: Batch,
    consistency: Consistency,
}

struct Shared {
    config: MemorySessionConfig,
    tables: RwLock<BTreeMap<String, Table>>,
    history: Mutex<VecDeque<Batch>>,
    live_replicas: AtomicUsize,
    open: AtomicBool,
    batches_executed: AtomicU64,
    batches_failed: AtomicU64,
    mutations_applied: AtomicU64,
    async_submitted: AtomicU64,
    async_failures: AtomicU64,
}

/// Process-local session
pub struct MemorySession {
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MemorySession {
    /// Create a session and start its asynchronous worker
    pub fn new(config: MemorySessionConfig) -> Result<Self> {
        if config.replication_factor == 0 {
            return Err(TallyError::Config(
                "Replication factor must be at least 1".into(),
            ));
        }
        if config.async_queue_capacity == 0 {
            return Err(TallyError::Config(
                "Async queue capacity must be at least 1".into(),
            ));
        }

        let shared = Arc::new(Shared {
            live_replicas: AtomicUsize::new(config.replication_factor),
            config,
            tables: RwLock::new(BTreeMap::new()),
            history: Mutex::new(VecDeque::new()),
            open: AtomicBool::new(true),
            batches_executed: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            mutations_applied: AtomicU64::new(0),
            async_submitted: AtomicU64::new(0),
            async_failures: AtomicU64::new(0),
        });

        let (sender, receiver) = bounded(shared.config.async_queue_capacity);
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("tally-session-async".into())
            .spawn(move || run_worker(worker_shared, receiver))?;

        info!(
            "Memory session started (replication factor {})",
            shared.config.replication_factor
        );

        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Simulate replicas going down or coming back
    pub fn set_live_replicas(&self, live: usize) {
        let live = live.min(self.shared.config.replication_factor);
        self.shared.live_replicas.store(live, Ordering::SeqCst);
    }

    /// Current counter value of a cell
    pub fn counter_value(&self, table: &str, key: &RowKey, column: &str) -> Option<i64> {
        match self.cell(table, key, column)? {
            Cell::Counter(value) => Some(value),
            Cell::Value { .. } => None,
        }
    }

    /// Current regular value of a cell
    pub fn value(&self, table: &str, key: &RowKey, column: &str) -> Option<Value> {
        match self.cell(table, key, column)? {
            Cell::Value { value, .. } => Some(value),
            Cell::Counter(_) => None,
        }
    }

    /// Stored cell for an exact row key
    pub fn cell(&self, table: &str, key: &RowKey, column: &str) -> Option<Cell> {
        let tables = self.shared.tables.read();
        tables
            .get(table)?
            .get(&key.canonical())?
            .cells
            .get(column)
            .cloned()
    }

    /// Number of rows in a table
    pub fn row_count(&self, table: &str) -> usize {
        self.shared
            .tables
            .read()
            .get(table)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    /// Keys of every row in a table
    pub fn row_keys(&self, table: &str) -> Vec<RowKey> {
        self.shared
            .tables
            .read()
            .get(table)
            .map(|t| t.values().map(|row| row.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Most recently executed batches, oldest first
    pub fn executed_batches(&self) -> Vec<Batch> {
        self.shared.history.lock().iter().cloned().collect()
    }

    /// Session statistics
    pub fn stats(&self) -> SessionStats {
        let tables = self.shared.tables.read();
        SessionStats {
            batches_executed: self.shared.batches_executed.load(Ordering::Relaxed),
            batches_failed: self.shared.batches_failed.load(Ordering::Relaxed),
            mutations_applied: self.shared.mutations_applied.load(Ordering::Relaxed),
            async_submitted: self.shared.async_submitted.load(Ordering::Relaxed),
            async_failures: self.shared.async_failures.load(Ordering::Relaxed),
            tables: tables.len(),
            rows: tables.values().map(|t| t.len()).sum(),
        }
    }
}

impl Session for MemorySession {
    fn execute(&self, batch: &Batch, consistency: Consistency) -> Result<()> {
        if !self.is_open() {
            return Err(TallyError::Unavailable("Session has been shut down".into()));
        }
        self.shared.execute(batch, consistency)
    }

    fn execute_async(&self, batch: Batch, consistency: Consistency) -> Result<()> {
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| TallyError::Unavailable("Session has been shut down".into()))?;

        match sender.try_send(Job { batch, consistency }) {
            Ok(()) => {
                self.shared.async_submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(TallyError::Unavailable(
                "Asynchronous queue is full".into(),
            )),
            Err(TrySendError::Disconnected(_)) => Err(TallyError::Unavailable(
                "Asynchronous worker has stopped".into(),
            )),
        }
    }

    fn supports_atomic_batches(&self) -> bool {
        self.shared.config.atomic_batches
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn shutdown(&self) -> Result<()> {
        self.shared.open.store(false, Ordering::SeqCst);

        // Closing the channel lets the worker drain what is queued and exit
        drop(self.sender.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            worker
                .join()
                .map_err(|_| TallyError::Storage("Asynchronous worker panicked".into()))?;
            info!("Memory session shut down");
        }
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Failed to shut down memory session: {}", e);
        }
    }
}

fn run_worker(shared: Arc<Shared>, receiver: Receiver<Job>) {
    for job in receiver.iter() {
        if let Err(e) = shared.execute(&job.batch, job.consistency) {
            shared.async_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Asynchronous batch of {} mutations failed: {}", job.batch.len(), e);
        }
    }
}

impl Shared {
    fn execute(&self, batch: &Batch, consistency: Consistency) -> Result<()> {
        let result = self.check_consistency(consistency).and_then(|_| {
            if batch.is_atomic() {
                if !self.config.atomic_batches {
                    return Err(TallyError::Config(
                        "Session does not support atomic batches".into(),
                    ));
                }
                self.apply_atomic(batch)
            } else {
                self.apply_unlogged(batch)
            }
        });

        match &result {
            Ok(()) => {
                self.batches_executed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Executed {} batch of {} mutations at {}",
                    if batch.is_atomic() { "logged" } else { "unlogged" },
                    batch.len(),
                    consistency
                );
            }
            Err(e) => {
                self.batches_failed.fetch_add(1, Ordering::Relaxed);
                debug!("Batch of {} mutations failed: {}", batch.len(), e);
            }
        }

        let mut history = self.history.lock();
        history.push_back(batch.clone());
        while history.len() > self.config.history_limit {
            history.pop_front();
        }

        result
    }

    fn check_consistency(&self, level: Consistency) -> Result<()> {
        let required = level.required_acks(self.config.replication_factor);
        let available = self.live_replicas.load(Ordering::SeqCst);
        if required > available {
            return Err(TallyError::ConsistencyUnsatisfiable {
                level,
                required,
                available,
            });
        }
        Ok(())
    }

    fn apply_atomic(&self, batch: &Batch) -> Result<()> {
        let mut tables = self.tables.write();
        let mut undo = UndoLog::default();

        for mutation in batch.mutations() {
            if !tables.contains_key(&mutation.table) {
                undo.created_tables.push(mutation.table.clone());
            }
            let table = tables.entry(mutation.table.clone()).or_default();
            undo.record(&mutation.table, table, mutation);
            if let Err(e) = apply(table, mutation) {
                undo.rollback(&mut tables);
                return Err(e);
            }
        }

        self.mutations_applied
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn apply_unlogged(&self, batch: &Batch) -> Result<()> {
        let mut tables = self.tables.write();
        let mut first_error = None;
        let mut applied = 0u64;

        for mutation in batch.mutations() {
            let table = tables.entry(mutation.table.clone()).or_default();
            match apply(table, mutation) {
                Ok(()) => applied += 1,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        self.mutations_applied.fetch_add(applied, Ordering::Relaxed);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Rows an atomic batch touched, as they were before the batch
#[derive(Default)]
struct UndoLog {
    rows: BTreeMap<(String, RowId), Option<Row>>,
    created_tables: Vec<String>,
}

impl UndoLog {
    /// Remember the rows `mutation` is about to change, first touch only
    fn record(&mut self, name: &str, table: &Table, mutation: &Mutation) {
        let predicate = mutation.key.canonical();
        let ids: Vec<RowId> = match &mutation.kind {
            MutationKind::Insert { .. }
            | MutationKind::IncrementCounter { .. }
            | MutationKind::DecrementCounter { .. } => vec![predicate],
            MutationKind::DeleteColumn { .. } | MutationKind::DeleteRow => table
                .keys()
                .filter(|id| matches(id, &predicate))
                .cloned()
                .collect(),
        };
        for id in ids {
            let prior = table.get(&id).cloned();
            self.rows.entry((name.to_string(), id)).or_insert(prior);
        }
    }

    fn rollback(self, tables: &mut BTreeMap<String, Table>) {
        for ((name, id), prior) in self.rows {
            if let Some(table) = tables.get_mut(&name) {
                match prior {
                    Some(row) => {
                        table.insert(id, row);
                    }
                    None => {
                        table.remove(&id);
                    }
                }
            }
        }
        for name in self.created_tables {
            if tables.get(&name).is_some_and(|t| t.is_empty()) {
                tables.remove(&name);
            }
        }
    }
}

fn apply(table: &mut Table, mutation: &Mutation) -> Result<()> {
    let predicate = mutation.key.canonical();

    match &mutation.kind {
        MutationKind::Insert { column, value } => {
            let row = table.entry(predicate).or_insert_with(|| Row {
                key: mutation.key.clone(),
                cells: BTreeMap::new(),
            });
            if let Some(Cell::Counter(_)) = row.cells.get(column) {
                return Err(TallyError::Storage(format!(
                    "Cannot insert into counter column {}",
                    column
                )));
            }
            row.cells.insert(
                column.clone(),
                Cell::Value {
                    value: value.clone(),
                    ttl: mutation.ttl,
                },
            );
        }
        MutationKind::DeleteColumn { column } => {
            for (_, row) in table.iter_mut().filter(|(id, _)| matches(id, &predicate)) {
                row.cells.remove(column);
            }
        }
        MutationKind::DeleteRow => {
            table.retain(|id, _| !matches(id, &predicate));
        }
        MutationKind::IncrementCounter { column, delta } => {
            adjust_counter(table, mutation, column, |current| current.checked_add(*delta))?;
        }
        MutationKind::DecrementCounter { column, delta } => {
            adjust_counter(table, mutation, column, |current| current.checked_sub(*delta))?;
        }
    }
    Ok(())
}

fn adjust_counter(
    table: &mut Table,
    mutation: &Mutation,
    column: &str,
    op: impl Fn(i64) -> Option<i64>,
) -> Result<()> {
    let row = table.entry(mutation.key.canonical()).or_insert_with(|| Row {
        key: mutation.key.clone(),
        cells: BTreeMap::new(),
    });

    let current = match row.cells.get(column) {
        Some(Cell::Counter(value)) => *value,
        Some(Cell::Value { .. }) => {
            return Err(TallyError::Storage(format!(
                "Column {} is not a counter",
                column
            )))
        }
        None => 0,
    };
    let next = op(current)
        .ok_or_else(|| TallyError::Storage(format!("Counter {} overflowed", column)))?;
    row.cells.insert(column.to_string(), Cell::Counter(next));
    Ok(())
}

fn matches(id: &RowId, predicate: &RowId) -> bool {
    predicate
        .iter()
        .all(|(column, literal)| id.get(column) == Some(literal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutation(key: RowKey, kind: MutationKind) -> Mutation {
        Mutation {
            table: "t".into(),
            key,
            kind,
            consistency: Consistency::One,
            ttl: None,
        }
    }

    fn incr(id: i64, delta: i64) -> Mutation {
        mutation(
            RowKey::new("id", id),
            MutationKind::IncrementCounter { column: "n".into(), delta },
        )
    }

    fn insert(id: i64, column: &str, value: Value) -> Mutation {
        mutation(
            RowKey::new("id", id),
            MutationKind::Insert { column: column.into(), value },
        )
    }

    fn session() -> MemorySession {
        MemorySession::new(MemorySessionConfig::default()).unwrap()
    }

    #[test]
    fn test_counters_accumulate() {
        let session = session();
        let batch = Batch::new(None, vec![incr(1, 5), incr(1, 2), incr(2, 1)], true, Consistency::One);
        session.execute(&batch, Consistency::One).unwrap();

        assert_eq!(session.counter_value("t", &RowKey::new("id", 1), "n"), Some(7));
        assert_eq!(session.counter_value("t", &RowKey::new("id", 2), "n"), Some(1));
        assert_eq!(session.row_count("t"), 2);
    }

    #[test]
    fn test_atomic_batch_is_all_or_nothing() {
        let session = session();
        session
            .execute(
                &Batch::new(None, vec![insert(9, "n", Value::from("text"))], true, Consistency::One),
                Consistency::One,
            )
            .unwrap();

        // Second mutation targets a regular column with a counter update
        let batch = Batch::new(None, vec![incr(1, 1), incr(9, 1)], true, Consistency::One);
        assert!(session.execute(&batch, Consistency::One).is_err());
        assert_eq!(session.counter_value("t", &RowKey::new("id", 1), "n"), None);
        assert_eq!(session.stats().batches_failed, 1);
    }

    #[test]
    fn test_failed_atomic_batch_keeps_existing_rows() {
        let session = session();
        let setup = vec![incr(1, 5), incr(2, 3), insert(9, "n", Value::from("text"))];
        session
            .execute(&Batch::new(None, setup, true, Consistency::One), Consistency::One)
            .unwrap();

        let batch = Batch::new(
            None,
            vec![
                incr(1, 10),
                incr(1, 10),
                incr(3, 1),
                mutation(RowKey::new("id", 2), MutationKind::DeleteRow),
                incr(9, 1),
            ],
            true,
            Consistency::One,
        );
        assert!(session.execute(&batch, Consistency::One).is_err());

        assert_eq!(session.counter_value("t", &RowKey::new("id", 1), "n"), Some(5));
        assert_eq!(session.counter_value("t", &RowKey::new("id", 2), "n"), Some(3));
        assert_eq!(session.counter_value("t", &RowKey::new("id", 3), "n"), None);
        assert_eq!(session.value("t", &RowKey::new("id", 9), "n"), Some(Value::from("text")));
        assert_eq!(session.row_count("t"), 3);
        assert_eq!(session.stats().mutations_applied, 3);
    }

    #[test]
    fn test_failed_atomic_batch_drops_created_table() {
        let session = session();
        session
            .execute(
                &Batch::new(None, vec![insert(9, "n", Value::from("text"))], true, Consistency::One),
                Consistency::One,
            )
            .unwrap();

        let mut fresh = incr(1, 1);
        fresh.table = "fresh".into();
        let batch = Batch::new(None, vec![fresh, incr(9, 1)], true, Consistency::One);
        assert!(session.execute(&batch, Consistency::One).is_err());

        assert_eq!(session.row_count("fresh"), 0);
        assert_eq!(session.stats().tables, 1);
    }

    #[test]
    fn test_unlogged_batch_is_best_effort() {
        let session = session();
        session
            .execute(
                &Batch::new(None, vec![insert(9, "n", Value::from("text"))], false, Consistency::One),
                Consistency::One,
            )
            .unwrap();

        let batch = Batch::new(None, vec![incr(9, 1), incr(1, 1)], false, Consistency::One);
        assert!(session.execute(&batch, Consistency::One).is_err());
        assert_eq!(session.counter_value("t", &RowKey::new("id", 1), "n"), Some(1));
    }

    #[test]
    fn test_delete_row_by_partition_prefix() {
        let session = session();
        let key = |name: &str, kind: &str| RowKey::new("name", name).and("kind", kind);
        let mutations = vec![
            mutation(key("a", "counts"), MutationKind::IncrementCounter { column: "value".into(), delta: 1 }),
            mutation(key("a", "sums"), MutationKind::IncrementCounter { column: "value".into(), delta: 4 }),
            mutation(key("b", "counts"), MutationKind::IncrementCounter { column: "value".into(), delta: 1 }),
            mutation(RowKey::new("name", "a"), MutationKind::DeleteRow),
        ];
        session
            .execute(&Batch::new(None, mutations, true, Consistency::One), Consistency::One)
            .unwrap();

        assert_eq!(session.row_count("t"), 1);
        assert_eq!(session.counter_value("t", &key("b", "counts"), "value"), Some(1));
    }

    #[test]
    fn test_insert_and_delete_column() {
        let session = session();
        let mut with_ttl = insert(1, "email", Value::from("a@b.c"));
        with_ttl.ttl = Some(30);
        let batch = Batch::new(
            None,
            vec![with_ttl, insert(1, "name", Value::from("ann"))],
            true,
            Consistency::One,
        );
        session.execute(&batch, Consistency::One).unwrap();

        let key = RowKey::new("id", 1);
        assert_eq!(
            session.cell("t", &key, "email"),
            Some(Cell::Value { value: Value::from("a@b.c"), ttl: Some(30) })
        );

        let delete = mutation(key.clone(), MutationKind::DeleteColumn { column: "email".into() });
        session
            .execute(&Batch::new(None, vec![delete], true, Consistency::One), Consistency::One)
            .unwrap();
        assert_eq!(session.value("t", &key, "email"), None);
        assert_eq!(session.value("t", &key, "name"), Some(Value::from("ann")));
    }

    #[test]
    fn test_consistency_not_satisfiable() {
        let session = session();
        session.set_live_replicas(1);

        let batch = Batch::new(None, vec![incr(1, 1)], true, Consistency::One);
        let err = session.execute(&batch, Consistency::Quorum).unwrap_err();
        assert!(matches!(
            err,
            TallyError::ConsistencyUnsatisfiable { required: 2, available: 1, .. }
        ));
        assert!(err.is_retryable());

        session.execute(&batch, Consistency::One).unwrap();
    }

    #[test]
    fn test_async_batches_drain_on_shutdown() {
        let session = session();
        for _ in 0..10 {
            let batch = Batch::new(None, vec![incr(1, 1)], true, Consistency::One);
            session.execute_async(batch, Consistency::One).unwrap();
        }
        session.shutdown().unwrap();

        assert_eq!(session.counter_value("t", &RowKey::new("id", 1), "n"), Some(10));
        assert!(!session.is_open());

        let batch = Batch::new(None, vec![incr(1, 1)], true, Consistency::One);
        assert!(matches!(
            session.execute_async(batch.clone(), Consistency::One),
            Err(TallyError::Unavailable(_))
        ));
        assert!(matches!(
            session.execute(&batch, Consistency::One),
            Err(TallyError::Unavailable(_))
        ));
    }

    #[test]
    fn test_async_failures_are_counted_not_returned() {
        let session = session();
        session.set_live_replicas(0);
        let batch = Batch::new(None, vec![incr(1, 1)], true, Consistency::One);
        assert!(session.execute_async(batch, Consistency::All).is_ok());
        session.shutdown().unwrap();

        let stats = session.stats();
        assert_eq!(stats.async_failures, 1);
        assert_eq!(stats.rows, 0);
    }

    #[test]
    fn test_session_without_atomic_batches() {
        let session = MemorySession::new(MemorySessionConfig {
            atomic_batches: false,
            ..Default::default()
        })
        .unwrap();
        assert!(!session.supports_atomic_batches());

        let batch = Batch::new(None, vec![incr(1, 1)], true, Consistency::One);
        assert!(session.execute(&batch, Consistency::One).unwrap_err().is_configuration());
    }

    #[test]
    fn test_history_is_bounded() {
        let session = MemorySession::new(MemorySessionConfig {
            history_limit: 2,
            ..Default::default()
        })
        .unwrap();
        for id in 0..5 {
            let batch = Batch::new(None, vec![incr(id, 1)], true, Consistency::One);
            session.execute(&batch, Consistency::One).unwrap();
        }
        let history = session.executed_batches();
        assert_eq!(history.len(), 2);
        assert!(history[1].statement().contains("id=4"));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = MemorySessionConfig {
            replication_factor: 0,
            ..Default::default()
        };
        assert!(MemorySession::new(config).is_err());
    }
}
