//! Storage sessions
//!
//! A [`Session`] executes rendered batches against a backend. Connection
//! bootstrapping, retries and timeouts belong to the session implementation;
//! the rest of the crate only hands it batches.

mod memory;

pub use memory::{Cell, MemorySession, MemorySessionConfig, SessionStats};

use crate::mutation::{Batch, Mutator, MutatorOptions};
use crate::{types, Consistency, Result, TallyError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How a batch is handed to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Block until the backend acknowledges or fails
    #[default]
    Synchronous,
    /// Return once the batch is queued; failures stay inside the session
    Asynchronous,
}

/// Handle to a storage backend
pub trait Session: Send + Sync {
    /// Execute a batch and wait for acknowledgment
    fn execute(&self, batch: &Batch, consistency: Consistency) -> Result<()>;

    /// Queue a batch without waiting. `Ok` only means the batch was accepted.
    fn execute_async(&self, batch: Batch, consistency: Consistency) -> Result<()>;

    /// Execute a batch in the given mode
    fn submit(&self, batch: Batch, consistency: Consistency, mode: ExecutionMode) -> Result<()> {
        match mode {
            ExecutionMode::Synchronous => self.execute(&batch, consistency),
            ExecutionMode::Asynchronous => self.execute_async(batch, consistency),
        }
    }

    /// Whether logged batches are applied all-or-nothing
    fn supports_atomic_batches(&self) -> bool {
        true
    }

    /// Whether the session still accepts work
    fn is_open(&self) -> bool;

    /// Release the connection
    fn shutdown(&self) -> Result<()>;
}

/// A named keyspace bound to a live session
#[derive(Clone)]
pub struct Keyspace {
    name: Option<String>,
    session: Arc<dyn Session>,
}

impl Keyspace {
    /// Bind a keyspace name to a session
    pub fn new(name: impl Into<String>, session: Arc<dyn Session>) -> Result<Self> {
        let name = name.into();
        types::validate_identifier("keyspace", &name)?;
        Self::bind(Some(name), session)
    }

    /// Use the session's current keyspace; statements are not qualified
    pub fn unqualified(session: Arc<dyn Session>) -> Result<Self> {
        Self::bind(None, session)
    }

    fn bind(name: Option<String>, session: Arc<dyn Session>) -> Result<Self> {
        if !session.is_open() {
            return Err(TallyError::Config("A live session is required".into()));
        }
        Ok(Self { name, session })
    }

    /// Keyspace name, if statements are qualified
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The bound session
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Create a mutator writing to this keyspace
    pub fn mutator(&self, options: MutatorOptions) -> Result<Mutator> {
        Mutator::new(self.clone(), options)
    }

    /// Shut the underlying session down
    pub fn shutdown(&self) -> Result<()> {
        self.session.shutdown()
    }
}

impl fmt::Debug for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyspace")
            .field("name", &self.name)
            .field("open", &self.session.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyspace_requires_open_session() {
        let session = Arc::new(MemorySession::new(MemorySessionConfig::default()).unwrap());
        let keyspace = Keyspace::new("metrics", session.clone()).unwrap();
        assert_eq!(keyspace.name(), Some("metrics"));

        session.shutdown().unwrap();
        let err = Keyspace::new("metrics", session).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_keyspace_name_validation() {
        let session = Arc::new(MemorySession::new(MemorySessionConfig::default()).unwrap());
        assert!(Keyspace::new("", session.clone()).is_err());
        assert!(Keyspace::new("bad name", session.clone()).is_err());
        assert!(Keyspace::unqualified(session).unwrap().name().is_none());
    }

    #[test]
    fn test_submit_dispatches_on_mode() {
        let session = MemorySession::new(MemorySessionConfig::default()).unwrap();
        let batch = Batch::new(None, vec![], true, Consistency::One);

        session
            .submit(batch.clone(), Consistency::One, ExecutionMode::Synchronous)
            .unwrap();
        session
            .submit(batch, Consistency::One, ExecutionMode::Asynchronous)
            .unwrap();
        session.shutdown().unwrap();

        let stats = session.stats();
        assert_eq!(stats.batches_executed, 2);
        assert_eq!(stats.async_submitted, 1);
    }
}
