//! Database layer for listing-ingest
//!
//! SQLite persistence for ingested listings. [`Database`] is the default
//! [`Sink`](crate::sink::Sink) implementation.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by concern:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`listings`] - Bulk insert, reference scan and lookups

use sqlx::{FromRow, sqlite::SqlitePool};

mod listings;
mod migrations;

/// Listing row as stored in the database
#[derive(Debug, Clone, FromRow)]
pub struct StoredListing {
    /// Unique database ID
    pub id: i64,
    /// Listing reference (unique)
    pub reference: String,
    /// Canonical listing URL
    pub url: Option<String>,
    /// Manufacturer
    pub make: String,
    /// Model name
    pub model: String,
    /// Model year
    pub year: f64,
    /// Asking price
    pub price: f64,
    /// Odometer reading
    pub mileage: Option<f64>,
    /// Fuel / energy type
    pub energy: Option<String>,
    /// Raw payload as JSON text
    pub payload: String,
    /// When the row was written (Unix timestamp)
    pub scraped_at: i64,
}

impl StoredListing {
    /// Parse the stored payload back into JSON
    pub fn payload_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.payload)
    }
}

/// Database handle for listing-ingest
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
