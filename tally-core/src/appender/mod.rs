//! Store-backed log layer
//!
//! [`StoreLayer`] is a `tracing_subscriber` layer that writes every log
//! event as a row in a log table, one single-column insert per attribute,
//! through a [`Mutator`]. Events are buffered and flushed as one batch when
//! the buffer is full, on [`StoreLayer::flush`] and when the last handle is
//! dropped.
//!
//! Events emitted by this crate are never stored, otherwise writing a batch
//! would log and buffer again.

use crate::mutation::{Mutator, MutatorOptions, NullPolicy, WriteOptions};
use crate::session::{ExecutionMode, Keyspace};
use crate::{Consistency, Result, TallyError, Timestamp, Value};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{warn, Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use uuid::Uuid;

const OWN_TARGET: &str = "tally_core";

/// Log layer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppenderConfig {
    /// Install the layer at startup
    pub enabled: bool,
    /// Log table
    pub table: String,
    /// Consistency of log inserts
    pub consistency: Consistency,
    /// Time-to-live of log rows in seconds; rows are kept forever if unset
    pub ttl_seconds: Option<u32>,
    /// Events buffered before a flush
    pub buffer_size: usize,
    /// Wait for the store to acknowledge each flush
    pub synchronous: bool,
    /// Host name written with every event; taken from `HOSTNAME` if unset
    pub host_name: Option<String>,
    /// Host address written with every event
    pub host_ip: Option<String>,
}

impl Default for AppenderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            table: crate::config::DEFAULT_LOG_TABLE.to_string(),
            consistency: Consistency::One,
            ttl_seconds: None,
            buffer_size: 1,
            synchronous: false,
            host_name: None,
            host_ip: None,
        }
    }
}

/// One captured log event
#[derive(Debug, Clone)]
struct LogRecord {
    key: Uuid,
    logger_name: String,
    log_level: String,
    log_timestamp: Timestamp,
    thread: Option<String>,
    file: Option<String>,
    line: Option<u32>,
    module: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

/// Collects the `message` and `error` fields of an event
#[derive(Default)]
struct EventVisitor {
    message: Option<String>,
    error: Option<String>,
}

impl EventVisitor {
    fn slot(&mut self, field: &Field) -> Option<&mut Option<String>> {
        match field.name() {
            "message" => Some(&mut self.message),
            "error" => Some(&mut self.error),
            _ => None,
        }
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if let Some(slot) = self.slot(field) {
            *slot = Some(value.to_string());
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if let Some(slot) = self.slot(field) {
            *slot = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if let Some(slot) = self.slot(field) {
            *slot = Some(format!("{:?}", value));
        }
    }
}

struct Inner {
    keyspace: Keyspace,
    config: AppenderConfig,
    host_name: Option<String>,
    started_at: Timestamp,
    buffer: Mutex<Vec<LogRecord>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let records = std::mem::take(&mut *self.buffer.lock());
        if let Err(e) = self.write(records) {
            warn!("Failed to flush buffered log events: {}", e);
        }
    }
}

/// Tracing layer writing log events to a table
#[derive(Clone)]
pub struct StoreLayer {
    inner: Arc<Inner>,
}

impl fmt::Debug for StoreLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLayer")
            .field("keyspace", &self.inner.keyspace.name())
            .field("config", &self.inner.config)
            .field("buffered", &self.buffered())
            .finish()
    }
}

impl StoreLayer {
    /// Create a layer writing to `config.table` in the given keyspace
    pub fn new(keyspace: Keyspace, config: AppenderConfig) -> Result<Self> {
        crate::types::validate_identifier("table", &config.table)?;
        if config.buffer_size == 0 {
            return Err(TallyError::Config(
                "The log buffer size must be greater than zero".into(),
            ));
        }

        let host_name = config
            .host_name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok());
        let inner = Inner {
            keyspace,
            config,
            host_name,
            started_at: Utc::now(),
            buffer: Mutex::new(Vec::new()),
        };
        // Fail now rather than on the first event
        inner.mutator()?;

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Write every buffered event
    pub fn flush(&self) -> Result<()> {
        let records = std::mem::take(&mut *self.inner.buffer.lock());
        self.inner.write(records)
    }

    /// Number of buffered events
    pub fn buffered(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    /// Layer settings
    pub fn config(&self) -> &AppenderConfig {
        &self.inner.config
    }
}

impl Inner {
    fn mutator(&self) -> Result<Mutator> {
        let mode = if self.config.synchronous {
            ExecutionMode::Synchronous
        } else {
            ExecutionMode::Asynchronous
        };
        let mut options = MutatorOptions::default()
            .consistency(self.config.consistency)
            .null_policy(NullPolicy::Ignore)
            .mode(mode);
        options.default_ttl = self.config.ttl_seconds;
        self.keyspace.mutator(options)
    }

    fn write(&self, records: Vec<LogRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut mutator = self.mutator()?;
        for record in &records {
            self.append(&mut mutator, record)?;
        }
        mutator.execute()
    }

    fn append(&self, mutator: &mut Mutator, record: &LogRecord) -> Result<()> {
        let table = self.config.table.as_str();
        let key = ("key", record.key);
        let columns: [(&str, Option<Value>); 14] = [
            ("logger_name", Some(record.logger_name.as_str().into())),
            ("log_level", Some(record.log_level.as_str().into())),
            ("log_timestamp", Some(record.log_timestamp.into())),
            ("context_host_name", self.host_name.as_deref().map(Value::from)),
            ("context_host_ip", self.config.host_ip.as_deref().map(Value::from)),
            ("context_app_start_time", Some(self.started_at.into())),
            ("context_thread", record.thread.as_deref().map(Value::from)),
            ("context_file", record.file.as_deref().map(Value::from)),
            ("context_line", record.line.map(Value::from)),
            ("context_module", record.module.as_deref().map(Value::from)),
            ("message_exists", Some(record.message.is_some().into())),
            ("message_rendered", record.message.as_deref().map(Value::from)),
            ("throwable_exists", Some(record.error.is_some().into())),
            ("throwable_message", record.error.as_deref().map(Value::from)),
        ];
        for (column, value) in columns {
            mutator.insert_column_with(table, key, column, value, WriteOptions::default())?;
        }
        Ok(())
    }
}

impl<S: Subscriber> Layer<S> for StoreLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(OWN_TARGET) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        let record = LogRecord {
            key: Uuid::new_v4(),
            logger_name: metadata.target().to_string(),
            log_level: metadata.level().to_string(),
            log_timestamp: Utc::now(),
            thread: std::thread::current().name().map(str::to_string),
            file: metadata.file().map(str::to_string),
            line: metadata.line(),
            module: metadata.module_path().map(str::to_string),
            message: visitor.message,
            error: visitor.error,
        };

        let full = {
            let mut buffer = self.inner.buffer.lock();
            buffer.push(record);
            buffer.len() >= self.inner.config.buffer_size
        };
        if full {
            if let Err(e) = self.flush() {
                warn!("Failed to write log events: {}", e);
            }
        }
    }
}
