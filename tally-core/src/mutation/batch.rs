//! Batch rendering

use super::Mutation;
use crate::Consistency;

const LOGGED_BEGIN: &str = "BEGIN BATCH\n";
const UNLOGGED_BEGIN: &str = "BEGIN UNLOGGED BATCH\n";
const APPLY: &str = "APPLY BATCH";

/// Render mutations as one batch statement.
///
/// Format:
/// - `BEGIN BATCH` (atomic) or `BEGIN UNLOGGED BATCH`
/// - one tab-indented statement per line, in insertion order
/// - `APPLY BATCH`
pub fn render_batch(keyspace: Option<&str>, mutations: &[Mutation], atomic: bool) -> String {
    let mut out = String::from(if atomic { LOGGED_BEGIN } else { UNLOGGED_BEGIN });
    for mutation in mutations {
        out.push('\t');
        out.push_str(&mutation.to_cql(keyspace));
        out.push('\n');
    }
    out.push_str(APPLY);
    out
}

/// An immutable batch ready to be executed by a session
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    keyspace: Option<String>,
    mutations: Vec<Mutation>,
    atomic: bool,
    consistency: Consistency,
    statement: String,
}

impl Batch {
    /// Build a batch. The effective consistency is the strictest level any
    /// mutation asks for, or `default` when the batch is empty.
    pub fn new(
        keyspace: Option<String>,
        mutations: Vec<Mutation>,
        atomic: bool,
        default: Consistency,
    ) -> Self {
        let consistency = mutations
            .iter()
            .map(|m| m.consistency)
            .reduce(Consistency::max)
            .unwrap_or(default);
        let statement = render_batch(keyspace.as_deref(), &mutations, atomic);

        Self {
            keyspace,
            mutations,
            atomic,
            consistency,
            statement,
        }
    }

    /// Keyspace the statements are qualified with
    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    /// Mutations in insertion order
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Whether all-or-nothing application was requested
    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    /// Effective consistency level
    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    /// Rendered batch statement
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// Number of mutations
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}
