//! Mutation builder
//!
//! A [`Mutator`] accumulates logical write operations against named tables
//! and renders them into a single batch statement. Each [`Mutation`] carries
//! its own resolved consistency level and optional TTL; a [`Batch`] is the
//! immutable snapshot handed to a [`Session`](crate::session::Session).
//!
//! Nothing reaches the backend until [`Mutator::execute`] is called.

mod batch;
mod mutator;
mod policy;

pub use batch::{render_batch, Batch};
pub use mutator::{Mutator, MutatorOptions};
pub use policy::{resolve, NullPolicy, WriteOptions};

use crate::{Consistency, RowKey, Value};
use serde::{Deserialize, Serialize};

/// Kind of a pending write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutationKind {
    /// Write a single column value
    Insert { column: String, value: Value },
    /// Remove a single column
    DeleteColumn { column: String },
    /// Remove every row matching the key
    DeleteRow,
    /// Add `delta` to a counter column
    IncrementCounter { column: String, delta: i64 },
    /// Subtract `delta` from a counter column
    DecrementCounter { column: String, delta: i64 },
}

impl MutationKind {
    /// Short operation name for logging
    pub fn name(&self) -> &'static str {
        match self {
            MutationKind::Insert { .. } => "insert",
            MutationKind::DeleteColumn { .. } => "delete_column",
            MutationKind::DeleteRow => "delete_row",
            MutationKind::IncrementCounter { .. } => "increment",
            MutationKind::DecrementCounter { .. } => "decrement",
        }
    }

    /// Target column, if the mutation is column scoped
    pub fn column(&self) -> Option<&str> {
        match self {
            MutationKind::Insert { column, .. }
            | MutationKind::DeleteColumn { column }
            | MutationKind::IncrementCounter { column, .. }
            | MutationKind::DecrementCounter { column, .. } => Some(column),
            MutationKind::DeleteRow => None,
        }
    }
}

/// A single pending write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Target table
    pub table: String,
    /// Equality predicates on the key columns
    pub key: RowKey,
    /// What to do
    pub kind: MutationKind,
    /// Consistency resolved when the mutation was appended
    pub consistency: Consistency,
    /// Time-to-live in seconds, inserts only
    pub ttl: Option<u32>,
}

impl Mutation {
    /// Render as one CQL statement, terminated by `;`
    pub fn to_cql(&self, keyspace: Option<&str>) -> String {
        let table = qualified(keyspace, &self.table);
        let predicate = self.key.to_where_clause();

        match &self.kind {
            MutationKind::Insert { column, value } => {
                let mut names: Vec<&str> =
                    self.key.columns().iter().map(|(name, _)| name.as_str()).collect();
                names.push(column);
                let mut values: Vec<String> =
                    self.key.columns().iter().map(|(_, v)| v.to_cql()).collect();
                values.push(value.to_cql());

                let mut statement = format!(
                    "INSERT INTO {}({}) VALUES ({})",
                    table,
                    names.join(","),
                    values.join(",")
                );
                if let Some(ttl) = self.ttl {
                    statement.push_str(&format!(" USING TTL {}", ttl));
                }
                statement.push(';');
                statement
            }
            MutationKind::DeleteColumn { column } => {
                format!("DELETE {} FROM {} WHERE {};", column, table, predicate)
            }
            MutationKind::DeleteRow => format!("DELETE FROM {} WHERE {};", table, predicate),
            MutationKind::IncrementCounter { column, delta } => format!(
                "UPDATE {} SET {}={}+{} WHERE {};",
                table,
                column,
                column,
                operand(*delta),
                predicate
            ),
            MutationKind::DecrementCounter { column, delta } => format!(
                "UPDATE {} SET {}={}-{} WHERE {};",
                table,
                column,
                column,
                operand(*delta),
                predicate
            ),
        }
    }
}

// `c=c--2` would open a comment
fn operand(delta: i64) -> String {
    if delta < 0 {
        format!(" {}", delta)
    } else {
        delta.to_string()
    }
}

fn qualified(keyspace: Option<&str>, table: &str) -> String {
    match keyspace {
        Some(ks) if !ks.is_empty() => format!("{}.{}", ks, table),
        _ => table.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutation(kind: MutationKind) -> Mutation {
        Mutation {
            table: "users".into(),
            key: RowKey::new("id", 1),
            kind,
            consistency: Consistency::One,
            ttl: None,
        }
    }

    #[test]
    fn test_insert_statement() {
        let mut m = mutation(MutationKind::Insert {
            column: "email".into(),
            value: Value::from("a@b.c"),
        });
        assert_eq!(
            m.to_cql(Some("app")),
            "INSERT INTO app.users(id,email) VALUES (1,'a@b.c');"
        );

        m.ttl = Some(60);
        assert_eq!(
            m.to_cql(None),
            "INSERT INTO users(id,email) VALUES (1,'a@b.c') USING TTL 60;"
        );
    }

    #[test]
    fn test_delete_statements() {
        let column = mutation(MutationKind::DeleteColumn { column: "email".into() });
        assert_eq!(column.to_cql(Some("app")), "DELETE email FROM app.users WHERE id=1;");

        let row = mutation(MutationKind::DeleteRow);
        assert_eq!(row.to_cql(None), "DELETE FROM users WHERE id=1;");
        assert_eq!(row.kind.column(), None);
    }

    #[test]
    fn test_counter_statements() {
        let incr = mutation(MutationKind::IncrementCounter { column: "hits".into(), delta: 5 });
        assert_eq!(incr.to_cql(None), "UPDATE users SET hits=hits+5 WHERE id=1;");

        // The operator comes from the operation, the delta is rendered as given
        let decr = mutation(MutationKind::DecrementCounter { column: "hits".into(), delta: -2 });
        assert_eq!(decr.to_cql(None), "UPDATE users SET hits=hits- -2 WHERE id=1;");
    }

    #[test]
    fn test_composite_key_statement() {
        let m = Mutation {
            table: "counters".into(),
            key: RowKey::new("name", "signups").and("kind", "counts"),
            kind: MutationKind::IncrementCounter { column: "value".into(), delta: 1 },
            consistency: Consistency::Quorum,
            ttl: None,
        };
        assert_eq!(
            m.to_cql(Some("stats")),
            "UPDATE stats.counters SET value=value+1 WHERE name='signups' AND kind='counts';"
        );
    }
}
