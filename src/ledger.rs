//! Reference ledger
//!
//! The set of listing references already known to the session. Seeded once
//! from the sink at start, grown as records are admitted, never shrunk and
//! never written to disk.

use crate::Result;
use crate::sink::Sink;
use crate::types::Record;
use std::collections::HashSet;

/// In-memory set of known references
#[derive(Clone, Debug, Default)]
pub struct ReferenceLedger {
    known: HashSet<String>,
}

impl ReferenceLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every reference the sink holds
    ///
    /// Returns how many references were loaded. One full scan; run once per
    /// session.
    pub async fn seed(&mut self, sink: &dyn Sink) -> Result<usize> {
        let references = sink.list_all_references().await?;
        let loaded = references.len();
        self.known.extend(references);
        tracing::info!(
            loaded,
            known = self.known.len(),
            "Seeded reference ledger"
        );
        Ok(loaded)
    }

    /// Whether the reference is known
    pub fn contains(&self, reference: &str) -> bool {
        self.known.contains(reference)
    }

    /// Record a reference; returns whether it was new
    pub fn add(&mut self, reference: impl Into<String>) -> bool {
        self.known.insert(reference.into())
    }

    /// Number of known references
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Whether nothing is known yet
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Keep the records whose reference is new and add them to the ledger
    ///
    /// Duplicates inside `records` count against the ledger too: only the
    /// first occurrence is kept. Returns the kept records and how many were
    /// skipped as already known.
    pub fn admit(&mut self, records: Vec<Record>) -> (Vec<Record>, usize) {
        let mut skipped = 0;
        let admitted = records
            .into_iter()
            .filter(|record| {
                let new = self.known.insert(record.reference().to_string());
                if !new {
                    skipped += 1;
                }
                new
            })
            .collect();
        (admitted, skipped)
    }
}

impl FromIterator<String> for ReferenceLedger {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            known: iter.into_iter().collect(),
        }
    }
}
