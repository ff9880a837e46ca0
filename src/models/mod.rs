use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ListingId = i64;
pub type RunId = i64;

/// Registration numbers the catalog prints when a car has none on file
const REGISTRATION_SENTINELS: [&str; 3] = ["", "-", "n/a"];

/// Raw record pulled off one result page, before filtering or reconciliation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub url: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub mileage: Option<String>,
    pub location: Option<String>,
    /// Price exactly as printed, e.g. "249 900 kr" or "2 499 kr/mån"
    pub price_text: String,
    pub registration_number: Option<String>,
}

/// A candidate that passed the lease filter, with price and mileage normalized
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub title: String,
    pub url: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub mileage: Option<String>,
    pub location: Option<String>,
    pub price: String,
    /// Always a usable value: sentinels are mapped to `None`
    pub registration_number: Option<String>,
}

/// Key used to match an observation against stored listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityKey<'a> {
    Registration(&'a str),
    Url(&'a str),
}

impl Observation {
    /// Registration number when usable, URL otherwise
    pub fn identity_key(&self) -> IdentityKey<'_> {
        match self.registration_number.as_deref() {
            Some(reg) => IdentityKey::Registration(reg),
            None => IdentityKey::Url(&self.url),
        }
    }
}

/// Fields only available on a listing's own page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingDetails {
    pub registration_number: Option<String>,
    pub color: Option<String>,
    pub drive_type: Option<String>,
    pub gearbox: Option<String>,
    pub body_type: Option<String>,
}

impl ListingDetails {
    pub fn is_empty(&self) -> bool {
        self.registration_number.is_none()
            && self.color.is_none()
            && self.drive_type.is_none()
            && self.gearbox.is_none()
            && self.body_type.is_none()
    }
}

/// Persisted vehicle listing
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Listing {
    pub id: ListingId,
    pub title: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub mileage: Option<String>,
    pub location: Option<String>,
    pub price: String,
    pub registration_number: Option<String>,
    pub url: String,
    pub color: Option<String>,
    pub drive_type: Option<String>,
    pub gearbox: Option<String>,
    pub body_type: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub run_id: Option<RunId>,
}

/// One price transition. `price` is the value the listing had *before* it changed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceHistoryEntry {
    pub id: i64,
    pub listing_id: ListingId,
    pub price: String,
    pub timestamp: DateTime<Utc>,
}

/// Ledger row for one crawl invocation
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScrapingRun {
    pub id: RunId,
    pub timestamp: DateTime<Utc>,
    pub search_params: String,
    pub total_count: Option<i64>,
}

/// Map the catalog's "no registration" placeholders to `None`
pub fn usable_registration(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if REGISTRATION_SENTINELS.contains(&trimmed.to_lowercase().as_str()) {
        None
    } else {
        Some(trimmed.to_string())
    }
}
