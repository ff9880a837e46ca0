use crate::error::{FetchError, MalformedCandidate};
use crate::models::{Candidate, ListingDetails};
use crate::scrapers::types::SearchParams;
use async_trait::async_trait;

/// A paginated catalog the crawl can walk.
///
/// Fetching and extraction are split so the pagination loop decides when a
/// page is requested, and extraction stays a pure function of the body.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch the raw body of one result page (1-based)
    async fn fetch_page(&self, params: &SearchParams, page: u32) -> Result<String, FetchError>;

    /// Pull candidate records out of a fetched page, in page order.
    /// Cards that lack required fields come back as `Err` so the caller can skip just that card.
    fn extract(&self, body: &str) -> Vec<Result<Candidate, MalformedCandidate>>;

    /// Fetch the descriptive fields shown on a listing's own page.
    /// `Ok(None)` means the page loaded but carried nothing usable.
    async fn fetch_details(&self, url: &str) -> Result<Option<ListingDetails>, FetchError>;

    /// Get the name of the catalog
    fn source_name(&self) -> &'static str;
}
