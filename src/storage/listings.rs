use crate::error::StorageError;
use crate::models::{IdentityKey, ListingDetails, ListingId, Observation, RunId};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

/// Where an observation stands against what is already stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Existing { id: ListingId, price: String },
    New,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created(ListingId),
    Updated { id: ListingId, price_changed: bool },
}

/// Finds the stored listing an observation refers to
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    pool: SqlitePool,
}

impl IdentityResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Match on registration number when the observation has a usable one, on url otherwise.
    ///
    /// A registration number is never second-guessed with the url: relisted cars can reuse
    /// a url that belonged to another car. If the matched listing sits under a different
    /// url its stored url is left alone.
    pub async fn resolve(&self, observation: &Observation) -> Result<Resolution, StorageError> {
        let row: Option<(ListingId, String, String)> = match observation.identity_key() {
            IdentityKey::Registration(reg) => {
                sqlx::query_as("SELECT id, price, url FROM listings WHERE registration_number = ?")
                    .bind(reg)
                    .fetch_optional(&self.pool)
                    .await?
            }
            IdentityKey::Url(url) => {
                sqlx::query_as("SELECT id, price, url FROM listings WHERE url = ? ORDER BY id LIMIT 1")
                    .bind(url)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        Ok(match row {
            Some((id, price, url)) => {
                if url != observation.url {
                    debug!(listing_id = id, stored = %url, seen = %observation.url, "Listing seen under a new url");
                }
                Resolution::Existing { id, price }
            }
            None => Resolution::New,
        })
    }
}

/// Fields refreshed on every sighting of a known listing
#[derive(Debug)]
struct ListingUpdate<'a> {
    title: &'a str,
    make: Option<&'a str>,
    model: Option<&'a str>,
    year: Option<i32>,
    mileage: Option<&'a str>,
    location: Option<&'a str>,
    price: &'a str,
    last_seen: DateTime<Utc>,
    run_id: RunId,
}

impl<'a> ListingUpdate<'a> {
    fn new(observation: &'a Observation, run_id: RunId, now: DateTime<Utc>) -> Self {
        Self {
            title: &observation.title,
            make: observation.make.as_deref(),
            model: observation.model.as_deref(),
            year: observation.year,
            mileage: observation.mileage.as_deref(),
            location: observation.location.as_deref(),
            price: &observation.price,
            last_seen: now,
            run_id,
        }
    }
}

/// Everything written when a listing is first seen
#[derive(Debug)]
struct NewListing<'a> {
    base: ListingUpdate<'a>,
    url: &'a str,
    registration_number: Option<&'a str>,
    color: Option<&'a str>,
    drive_type: Option<&'a str>,
    gearbox: Option<&'a str>,
    body_type: Option<&'a str>,
}

impl<'a> NewListing<'a> {
    fn new(
        observation: &'a Observation,
        details: Option<&'a ListingDetails>,
        run_id: RunId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            base: ListingUpdate::new(observation, run_id, now),
            url: &observation.url,
            registration_number: observation
                .registration_number
                .as_deref()
                .or_else(|| details.and_then(|d| d.registration_number.as_deref())),
            color: details.and_then(|d| d.color.as_deref()),
            drive_type: details.and_then(|d| d.drive_type.as_deref()),
            gearbox: details.and_then(|d| d.gearbox.as_deref()),
            body_type: details.and_then(|d| d.body_type.as_deref()),
        }
    }
}

/// Writes observations, appending price history when the price moved
#[derive(Debug, Clone)]
pub struct UpsertEngine {
    pool: SqlitePool,
}

impl UpsertEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply one observation in a single transaction.
    ///
    /// `details` is only read for new listings; known listings keep the
    /// descriptive fields captured when they were created.
    pub async fn reconcile(
        &self,
        observation: &Observation,
        resolution: &Resolution,
        details: Option<&ListingDetails>,
        run_id: RunId,
    ) -> Result<Outcome, StorageError> {
        let now = Utc::now();

        match resolution {
            Resolution::Existing { id, price } => {
                let price_changed = *price != observation.price;
                self.update(*id, price, price_changed, ListingUpdate::new(observation, run_id, now))
                    .await?;
                Ok(Outcome::Updated {
                    id: *id,
                    price_changed,
                })
            }
            Resolution::New => {
                let id = self
                    .insert(NewListing::new(observation, details, run_id, now))
                    .await?;
                Ok(Outcome::Created(id))
            }
        }
    }

    async fn update(
        &self,
        id: ListingId,
        previous_price: &str,
        price_changed: bool,
        update: ListingUpdate<'_>,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        if price_changed {
            sqlx::query("INSERT INTO price_history (listing_id, price, timestamp) VALUES (?, ?, ?)")
                .bind(id)
                .bind(previous_price)
                .bind(update.last_seen)
                .execute(&mut *tx)
                .await?;
            debug!(listing_id = id, from = previous_price, to = update.price, "Price changed");
        }

        sqlx::query(
            r#"
            UPDATE listings SET
                title = ?,
                make = ?,
                model = ?,
                year = ?,
                mileage = ?,
                location = ?,
                price = ?,
                last_seen = ?,
                run_id = ?
            WHERE id = ?
            "#,
        )
        .bind(update.title)
        .bind(update.make)
        .bind(update.model)
        .bind(update.year)
        .bind(update.mileage)
        .bind(update.location)
        .bind(update.price)
        .bind(update.last_seen)
        .bind(update.run_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert(&self, listing: NewListing<'_>) -> Result<ListingId, StorageError> {
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            r#"
            INSERT INTO listings (
                title, make, model, year, mileage, location, price,
                registration_number, url, color, drive_type, gearbox, body_type,
                first_seen, last_seen, run_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(listing.base.title)
        .bind(listing.base.make)
        .bind(listing.base.model)
        .bind(listing.base.year)
        .bind(listing.base.mileage)
        .bind(listing.base.location)
        .bind(listing.base.price)
        .bind(listing.registration_number)
        .bind(listing.url)
        .bind(listing.color)
        .bind(listing.drive_type)
        .bind(listing.gearbox)
        .bind(listing.body_type)
        .bind(listing.base.last_seen)
        .bind(listing.base.last_seen)
        .bind(listing.base.run_id)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;
        debug!(listing_id = id, url = listing.url, "Inserted new listing");
        Ok(id)
    }
}
