//! Consistency levels
//!
//! A consistency level is the number of replica acknowledgments a write
//! needs before it is considered successful. Levels map one to one onto the
//! backend-native names; the translation is an exhaustive match so adding a
//! level is a compile error until every mapping handles it.

use crate::TallyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Replica-acknowledgment policy for writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Consistency {
    /// A hint stored on the coordinator is enough
    Any,
    One,
    Two,
    Three,
    /// Majority of all replicas
    Quorum,
    All,
    /// Majority of replicas in the local datacenter
    LocalQuorum,
    /// Majority of replicas in every datacenter
    EachQuorum,
}

impl Consistency {
    /// All levels, weakest first
    pub const ALL_LEVELS: [Consistency; 8] = [
        Consistency::Any,
        Consistency::One,
        Consistency::Two,
        Consistency::Three,
        Consistency::LocalQuorum,
        Consistency::Quorum,
        Consistency::EachQuorum,
        Consistency::All,
    ];

    /// Level used when nothing was requested: single replica acknowledgment
    pub const DEFAULT: Consistency = Consistency::One;

    /// Resolve an optional level against the global default
    pub fn resolve(level: Option<Consistency>) -> Consistency {
        level.unwrap_or(Self::DEFAULT)
    }

    /// Backend-native level name
    pub fn as_native(&self) -> &'static str {
        match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
        }
    }

    /// Number of replicas that must acknowledge for the given replication factor.
    ///
    /// Datacenter-scoped quorums are computed as if the cluster had a single
    /// datacenter.
    pub fn required_acks(&self, replication_factor: usize) -> usize {
        let quorum = replication_factor / 2 + 1;
        match self {
            Consistency::Any => 0,
            Consistency::One => 1,
            Consistency::Two => 2,
            Consistency::Three => 3,
            Consistency::Quorum | Consistency::LocalQuorum | Consistency::EachQuorum => quorum,
            Consistency::All => replication_factor,
        }
    }

    /// Strictness rank used to pick one level for a whole batch
    pub fn strictness(&self) -> u8 {
        match self {
            Consistency::Any => 0,
            Consistency::One => 1,
            Consistency::Two => 2,
            Consistency::Three => 3,
            Consistency::LocalQuorum => 4,
            Consistency::Quorum => 5,
            Consistency::EachQuorum => 6,
            Consistency::All => 7,
        }
    }

    /// The stricter of two levels
    pub fn max(self, other: Consistency) -> Consistency {
        if other.strictness() > self.strictness() {
            other
        } else {
            self
        }
    }
}

impl Default for Consistency {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_native())
    }
}

impl FromStr for Consistency {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Consistency::ALL_LEVELS
            .iter()
            .copied()
            .find(|level| level.as_native() == normalized)
            .ok_or_else(|| TallyError::Config(format!("Unknown consistency level: {}", s)))
    }
}

impl TryFrom<String> for Consistency {
    type Error = TallyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Consistency> for String {
    fn from(level: Consistency) -> Self {
        level.as_native().to_string()
    }
}
