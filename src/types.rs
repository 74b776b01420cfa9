//! Core types for listing-ingest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::backup::BackupReason;

/// Page number within the listing range
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u32);

impl PageId {
    /// Create a new PageId
    pub fn new(page: u32) -> Self {
        Self(page)
    }

    /// Get the inner page number
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for PageId {
    fn from(page: u32) -> Self {
        Self(page)
    }
}

impl From<PageId> for u32 {
    fn from(page: PageId) -> Self {
        page.0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// One ingestible listing
///
/// The payload is kept exactly as parsed so backups hold the original form.
/// A record is never mutated in place; [`Record::with_url`] returns a copy.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    reference: String,
    url: Option<String>,
    payload: Value,
}

impl Record {
    /// Build a record from a parsed candidate
    ///
    /// Returns `None` when `item.reference` is missing, not a string, or empty.
    pub fn from_candidate(payload: Value) -> Option<Self> {
        let reference = payload
            .get("item")
            .and_then(|item| item.get("reference"))
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())?
            .to_string();
        let url = payload
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self {
            reference,
            url,
            payload,
        })
    }

    /// Copy of this record with the canonical URL attached at the top level
    pub fn with_url(&self, url: &str) -> Self {
        let mut payload = self.payload.clone();
        if let Value::Object(map) = &mut payload {
            map.insert("url".to_string(), Value::String(url.to_string()));
        }
        Self {
            reference: self.reference.clone(),
            url: Some(url.to_string()),
            payload,
        }
    }

    /// Globally unique listing reference
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Canonical listing URL, if resolved
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Raw structured payload
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Typed view of the payload for the sink
    ///
    /// Only meaningful for records that passed validation.
    pub fn listing(&self) -> serde_json::Result<Listing> {
        let item: ListingItem = serde_json::from_value(
            self.payload.get("item").cloned().unwrap_or(Value::Null),
        )?;
        Ok(Listing {
            reference: self.reference.clone(),
            url: self.url.clone(),
            price: item.price,
            vehicle: item.vehicle,
            customer_reference: item.customer_reference,
            is_new: item.is_new.unwrap_or(false),
            good_deal_badge: item.good_deal_badge,
            first_online_date: item.first_online_date,
        })
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.payload.serialize(serializer)
    }
}

/// Listing fields the sink stores in typed columns
#[derive(Clone, Debug, PartialEq)]
pub struct Listing {
    /// Listing reference
    pub reference: String,
    /// Canonical URL
    pub url: Option<String>,
    /// Asking price
    pub price: f64,
    /// Vehicle description
    pub vehicle: Vehicle,
    /// Seller reference
    pub customer_reference: Option<String>,
    /// Whether the vehicle is new
    pub is_new: bool,
    /// Deal rating label
    pub good_deal_badge: Option<String>,
    /// First publication date as reported by the source
    pub first_online_date: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingItem {
    price: f64,
    vehicle: Vehicle,
    #[serde(default, deserialize_with = "lenient")]
    customer_reference: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    is_new: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    good_deal_badge: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    first_online_date: Option<String>,
}

/// Vehicle sub-object of a listing
///
/// `make`, `model` and `year` are required; everything else is optional and
/// dropped to `None` when it has an unexpected type.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    /// Manufacturer
    pub make: String,
    /// Model name
    pub model: String,
    /// Model year
    pub year: f64,
    /// Vehicle identification number
    #[serde(default, deserialize_with = "lenient")]
    pub vin: Option<String>,
    /// Detailed model name
    #[serde(default, deserialize_with = "lenient")]
    pub detailed_model: Option<String>,
    /// Version string
    #[serde(default, deserialize_with = "lenient")]
    pub version: Option<String>,
    /// Trim level
    #[serde(default, deserialize_with = "lenient")]
    pub trim_level: Option<String>,
    /// Number of doors
    #[serde(default, deserialize_with = "lenient")]
    pub doors: Option<f64>,
    /// Gearbox type
    #[serde(default, deserialize_with = "lenient")]
    pub gearbox: Option<String>,
    /// Engine description
    #[serde(default, deserialize_with = "lenient")]
    pub motorization: Option<String>,
    /// Fuel / energy type
    #[serde(default, deserialize_with = "lenient")]
    pub energy: Option<String>,
    /// Exterior colour
    #[serde(default, deserialize_with = "lenient")]
    pub external_color: Option<String>,
    /// Body category
    #[serde(default, deserialize_with = "lenient")]
    pub category: Option<String>,
    /// Vehicle family
    #[serde(default, deserialize_with = "lenient")]
    pub family: Option<String>,
    /// Odometer reading in km
    #[serde(default, deserialize_with = "lenient")]
    pub mileage: Option<f64>,
}

// Optional fields with a wrong type become None instead of failing the record
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Counters for one ingestion session
///
/// Owned by the session (or the collector in parallel mode); workers never
/// touch it directly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Pages fetched and parsed (including pages that yielded nothing)
    pub pages_processed: u64,
    /// Pages whose fetch failed
    pub pages_failed: u64,
    /// Candidate records seen on processed pages
    pub records_found: u64,
    /// Records that passed validation and dedup and entered the buffer
    pub records_validated: u64,
    /// Records rejected by the validator
    pub records_skipped_invalid: u64,
    /// Records without a matching listing URL
    pub records_skipped_unlinked: u64,
    /// Records skipped because their reference was already known
    pub existing_records_skipped: u64,
    /// Records the sink accepted
    pub records_saved: u64,
    /// Bulk writes attempted
    pub flush_attempts: u64,
    /// Backup files written
    pub backups_written: u64,
    /// Backup files that could not be written
    pub backup_failures: u64,
    /// Bulk writes that raised an error
    pub sink_errors: u64,
    /// Page fetches that failed
    pub fetch_errors: u64,
    /// Workers that could not acquire a fetch context
    pub workers_failed: u64,
    /// All errors, any category
    pub errors: u64,
    /// New records found this session (incremental mode)
    pub new_records: u64,
}

impl Stats {
    /// Percentage of validated records the sink accepted
    pub fn success_rate(&self) -> f64 {
        self.records_saved as f64 / self.records_validated.max(1) as f64 * 100.0
    }

    /// Records skipped for any reason
    pub fn records_skipped(&self) -> u64 {
        self.records_skipped_invalid + self.records_skipped_unlinked + self.existing_records_skipped
    }
}

/// Where a session is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum SessionPhase {
    /// Not started
    Idle,
    /// Started, between pages
    Running,
    /// Waiting on the fetch collaborator
    Fetching,
    /// Extracting records from page content
    Parsing,
    /// Appending page results to the buffer
    Buffering,
    /// Writing the buffer to the sink
    Flushing {
        /// Whether this is the end-of-session flush
        final_flush: bool,
    },
    /// All pages handled
    Completed,
    /// Stopped early (cancelled, or no fetch context could be created)
    Aborted,
}

impl SessionPhase {
    /// Whether the session has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Aborted)
    }
}

/// Event emitted by a running session
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Session began
    SessionStarted {
        /// Scheduling model
        mode: crate::config::SessionMode,
        /// First page
        start_page: PageId,
        /// Last page
        end_page: PageId,
        /// References already known at start
        known_references: usize,
    },

    /// A worker acquired its fetch context
    WorkerStarted {
        /// Worker number (1-based)
        worker_id: usize,
    },

    /// A page was processed
    PageProcessed {
        /// Page number
        page: PageId,
        /// Worker that processed it (0 in sequential mode)
        worker_id: usize,
        /// Records that entered the buffer
        records: usize,
    },

    /// A page could not be fetched
    PageFailed {
        /// Page number
        page: PageId,
        /// Worker that tried it (0 in sequential mode)
        worker_id: usize,
        /// Error text
        error: String,
    },

    /// The buffer was written to the sink
    Flushed {
        /// Records submitted
        submitted: usize,
        /// Records accepted
        accepted: usize,
        /// Whether this was the end-of-session flush
        final_flush: bool,
    },

    /// Records the sink did not take were written to a backup file
    BackupWritten {
        /// Why the backup was needed
        reason: BackupReason,
        /// Backup file
        path: PathBuf,
        /// Records in the file
        records: usize,
    },

    /// Periodic statistics snapshot
    Progress {
        /// Current counters
        stats: Stats,
        /// Records waiting in the buffer
        buffered: usize,
    },

    /// A worker exited normally
    WorkerFinished {
        /// Worker number
        worker_id: usize,
        /// Pages this worker processed
        pages: u64,
        /// Records this worker produced
        records: u64,
    },

    /// A worker could not start
    WorkerFailed {
        /// Worker number
        worker_id: usize,
        /// Error text
        error: String,
    },

    /// Session ended
    SessionFinished {
        /// Final phase
        phase: SessionPhase,
        /// Final counters
        stats: Stats,
        /// When it finished
        finished_at: DateTime<Utc>,
    },
}
