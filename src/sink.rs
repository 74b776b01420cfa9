//! Primary store collaborator
//!
//! The pipeline only needs two things from its store: a bulk write that
//! says how much it took, and a scan of every reference it already holds.

use crate::Result;
use crate::types::Record;
use async_trait::async_trait;
use std::collections::HashSet;

/// Outcome of one bulk write
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InsertReport {
    /// Records newly stored
    pub accepted: usize,
    /// References of the records not stored, when the sink can tell
    ///
    /// `None` means only the count is known and callers fall back to the
    /// positional tail of the submitted batch.
    pub rejected: Option<Vec<String>>,
}

impl InsertReport {
    /// Every submitted record was stored
    pub fn all(accepted: usize) -> Self {
        Self {
            accepted,
            rejected: Some(Vec::new()),
        }
    }

    /// Only a count is known
    pub fn count_only(accepted: usize) -> Self {
        Self {
            accepted,
            rejected: None,
        }
    }
}

/// Persistent store that accepts bulk writes
///
/// Writes are idempotent per reference: writing a reference that is already
/// stored is a no-op and is not counted as accepted.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Write a batch in one call
    async fn insert_many(&self, records: &[Record]) -> Result<InsertReport>;

    /// Every reference currently stored
    async fn list_all_references(&self) -> Result<HashSet<String>>;
}
