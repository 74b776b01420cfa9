//! Listing writes and reads.

use crate::error::DatabaseError;
use crate::sink::{InsertReport, Sink};
use crate::types::Record;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;

use super::{Database, StoredListing};

impl Database {
    /// Insert a batch of listings in one transaction
    ///
    /// Rows whose reference is already stored are left untouched and reported
    /// as rejected, as are records whose payload lacks the typed columns.
    /// Any query error rolls back the whole batch.
    pub async fn insert_listings(&self, records: &[Record]) -> Result<InsertReport> {
        if records.is_empty() {
            return Ok(InsertReport::all(0));
        }

        let now = chrono::Utc::now().timestamp();
        let mut rejected = Vec::new();
        let mut accepted = 0usize;

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin listing transaction: {}",
                e
            )))
        })?;

        for record in records {
            let listing = match record.listing() {
                Ok(listing) => listing,
                Err(e) => {
                    tracing::warn!(
                        reference = record.reference(),
                        error = %e,
                        "Listing payload lacks typed columns, not stored"
                    );
                    rejected.push(record.reference().to_string());
                    continue;
                }
            };
            let payload = serde_json::to_string(record.payload())
                .map_err(|e| payload_encode_error(&listing.reference, e))?;
            let vehicle = &listing.vehicle;

            let result = sqlx::query(
                r#"
                INSERT INTO listings (
                    reference, url, make, model, year, price,
                    vin, detailed_model, version, trim_level, doors,
                    gearbox, motorization, energy, external_color, category,
                    family, mileage, customer_reference, is_new,
                    good_deal_badge, first_online_date, payload, scraped_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(reference) DO NOTHING
                "#,
            )
            .bind(&listing.reference)
            .bind(&listing.url)
            .bind(&vehicle.make)
            .bind(&vehicle.model)
            .bind(vehicle.year)
            .bind(listing.price)
            .bind(&vehicle.vin)
            .bind(&vehicle.detailed_model)
            .bind(&vehicle.version)
            .bind(&vehicle.trim_level)
            .bind(vehicle.doors)
            .bind(&vehicle.gearbox)
            .bind(&vehicle.motorization)
            .bind(&vehicle.energy)
            .bind(&vehicle.external_color)
            .bind(&vehicle.category)
            .bind(&vehicle.family)
            .bind(vehicle.mileage)
            .bind(&listing.customer_reference)
            .bind(listing.is_new)
            .bind(&listing.good_deal_badge)
            .bind(&listing.first_online_date)
            .bind(payload)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert listing {}: {}",
                    listing.reference, e
                )))
            })?;

            if result.rows_affected() == 1 {
                accepted += 1;
            } else {
                rejected.push(listing.reference);
            }
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit listing batch: {}",
                e
            )))
        })?;

        tracing::debug!(
            submitted = records.len(),
            accepted,
            rejected = rejected.len(),
            "Inserted listing batch"
        );

        Ok(InsertReport {
            accepted,
            rejected: Some(rejected),
        })
    }

    /// Every stored listing reference
    pub async fn list_references(&self) -> Result<HashSet<String>> {
        let references: Vec<String> = sqlx::query_scalar("SELECT reference FROM listings")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list listing references: {}",
                    e
                )))
            })?;

        Ok(references.into_iter().collect())
    }

    /// Number of stored listings
    pub async fn count_listings(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count listings: {}",
                    e
                )))
            })?;

        Ok(count)
    }

    /// Get a listing by reference
    pub async fn get_listing(&self, reference: &str) -> Result<Option<StoredListing>> {
        let row = sqlx::query_as::<_, StoredListing>(
            r#"
            SELECT
                id, reference, url, make, model, year, price,
                mileage, energy, payload, scraped_at
            FROM listings
            WHERE reference = ?
            "#,
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get listing: {}",
                e
            )))
        })?;

        Ok(row)
    }
}

/// A payload that cannot be encoded fails the batch as a sink query error
pub(super) fn payload_encode_error(reference: &str, e: serde_json::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!(
        "Failed to encode payload of listing {}: {}",
        reference, e
    )))
}

#[async_trait]
impl Sink for Database {
    async fn insert_many(&self, records: &[Record]) -> Result<InsertReport> {
        self.insert_listings(records).await
    }

    async fn list_all_references(&self) -> Result<HashSet<String>> {
        self.list_references().await
    }
}
