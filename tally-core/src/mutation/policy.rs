//! Null treatment and default resolution

use crate::{Consistency, TallyError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What an insert does when the value to write is absent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullPolicy {
    /// Fail the call, nothing is appended
    #[default]
    Error,
    /// Append a column delete instead of the insert
    Delete,
    /// Append nothing
    Ignore,
}

impl FromStr for NullPolicy {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(NullPolicy::Error),
            "delete" => Ok(NullPolicy::Delete),
            "ignore" => Ok(NullPolicy::Ignore),
            _ => Err(TallyError::Config(format!("Unknown null policy: {}", s))),
        }
    }
}

/// Per-call overrides of the mutator defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Time-to-live in seconds (inserts only)
    pub ttl: Option<u32>,
    /// Consistency level for this mutation
    pub consistency: Option<Consistency>,
}

impl WriteOptions {
    /// Options with an explicit TTL
    pub fn ttl(seconds: u32) -> Self {
        Self {
            ttl: Some(seconds),
            consistency: None,
        }
    }

    /// Options with an explicit consistency level
    pub fn consistency(level: Consistency) -> Self {
        Self {
            ttl: None,
            consistency: Some(level),
        }
    }

    /// Set the consistency level
    pub fn with_consistency(mut self, level: Consistency) -> Self {
        self.consistency = Some(level);
        self
    }
}

/// First present value: the explicit per-call one, then the builder-wide default
pub fn resolve<T: Copy>(explicit: Option<T>, default: Option<T>) -> Option<T> {
    explicit.or(default)
}
