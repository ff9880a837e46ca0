use crate::error::MalformedCandidate;
use crate::models::{usable_registration, Candidate, Observation};

/// Price markers that mean the card advertises a monthly payment
pub const DEFAULT_LEASE_MARKERS: [&str; 5] = ["kr/mån", "/mån", "per mån", "/man", "kr/m"];

/// What to do with one extracted candidate
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    Keep(Observation),
    /// Recurring-payment offer, skipped without a trace in storage
    Lease,
    Malformed(MalformedCandidate),
}

/// Drops lease offers and normalizes what is left
#[derive(Debug, Clone)]
pub struct LeaseOfferFilter {
    markers: Vec<String>,
}

impl Default for LeaseOfferFilter {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_MARKERS)
    }
}

impl LeaseOfferFilter {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn is_lease_offer(&self, price_text: &str) -> bool {
        let lowered = price_text.to_lowercase();
        self.markers.iter().any(|marker| lowered.contains(marker.as_str()))
    }

    pub fn apply(&self, candidate: Candidate) -> FilterDecision {
        if self.is_lease_offer(&candidate.price_text) {
            return FilterDecision::Lease;
        }

        let price = normalize_price(&candidate.price_text);
        if price.is_empty() {
            return FilterDecision::Malformed(MalformedCandidate::UnusablePrice(candidate.price_text));
        }

        FilterDecision::Keep(Observation {
            registration_number: usable_registration(candidate.registration_number.as_deref()),
            mileage: candidate
                .mileage
                .as_deref()
                .map(normalize_mileage)
                .filter(|m| !m.is_empty()),
            title: candidate.title,
            url: candidate.url,
            make: candidate.make,
            model: candidate.model,
            year: candidate.year,
            location: candidate.location,
            price,
        })
    }
}

/// Canonical stored form of a price: "449 900 kr" becomes "449900".
/// Only the digits survive, so labels, currency and separators never make a
/// price look changed. Every comparison and every write goes through this.
pub fn normalize_price(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Canonical stored form of a mileage: "1 500 mil" becomes "1500"
pub fn normalize_mileage(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    compact
        .strip_suffix("mil")
        .unwrap_or(&compact)
        .to_string()
}
