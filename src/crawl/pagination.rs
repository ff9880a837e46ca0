use crate::crawl::cancel::CancellationController;
use crate::crawl::delay::PoliteDelayScheduler;
use crate::crawl::filter::{FilterDecision, LeaseOfferFilter};
use crate::error::{MalformedCandidate, StorageError};
use crate::models::{usable_registration, Candidate, ListingDetails, Observation, RunId};
use crate::scrapers::traits::ListingSource;
use crate::scrapers::types::SearchParams;
use crate::storage::{Outcome, Resolution, Storage};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Why a crawl ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// The page had nothing left after filtering
    Exhausted { page: u32 },
    FetchFailed { page: u32, error: String },
    Cancelled,
    PageLimit { max_pages: u32 },
}

/// Counters for one crawl, handed back to the caller when it ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub pages: u32,
    pub created: u64,
    pub updated: u64,
    pub price_changes: u64,
    pub skipped_lease: u64,
    pub skipped_malformed: u64,
    pub failed: u64,
    pub stop_reason: Option<StopReason>,
}

impl RunSummary {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            pages: 0,
            created: 0,
            updated: 0,
            price_changes: 0,
            skipped_lease: 0,
            skipped_malformed: 0,
            failed: 0,
            stop_reason: None,
        }
    }

    /// Candidates that made it into storage, new or refreshed
    pub fn total(&self) -> u64 {
        self.created + self.updated
    }
}

/// Result of handling one fetched page
enum PageOutcome {
    Continue,
    Stop(StopReason),
}

/// Walks the catalog one page at a time and reconciles every listing on it.
///
/// Per page: fetch, extract, filter, reconcile each survivor, then either
/// move on to the next page or stop. The crawl stops on a page with no
/// usable candidates, on any failed page fetch, on a stop request, or at the
/// optional page limit. Every network call is preceded by a polite delay.
pub struct PaginationController<S> {
    source: S,
    storage: Storage,
    filter: LeaseOfferFilter,
    delay: PoliteDelayScheduler,
    cancel: CancellationController,
    max_pages: Option<u32>,
}

impl<S: ListingSource> PaginationController<S> {
    pub fn new(
        source: S,
        storage: Storage,
        filter: LeaseOfferFilter,
        delay: PoliteDelayScheduler,
        cancel: CancellationController,
    ) -> Self {
        Self {
            source,
            storage,
            filter,
            delay,
            cancel,
            max_pages: None,
        }
    }

    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Run one crawl. The ledger row is finished with whatever was reconciled,
    /// however the crawl ended; only ledger failures surface as errors.
    pub async fn run(&self, params: &SearchParams) -> Result<RunSummary, StorageError> {
        let ledger = self.storage.ledger();
        let run_id = ledger.begin(params).await?;

        info!(
            "Starting {} crawl for {} {}",
            self.source.source_name(),
            params.make,
            params.model
        );

        let mut summary = RunSummary::new(run_id);
        let reason = self.crawl(params, &mut summary).await;
        info!(?reason, total = summary.total(), "Crawl stopped");
        summary.stop_reason = Some(reason);

        ledger.finish(run_id, summary.total()).await?;
        Ok(summary)
    }

    async fn crawl(&self, params: &SearchParams, summary: &mut RunSummary) -> StopReason {
        let mut page: u32 = 1;

        loop {
            if let Some(max_pages) = self.max_pages {
                if page > max_pages {
                    return StopReason::PageLimit { max_pages };
                }
            }
            if self.cancel.is_stop_requested() {
                return StopReason::Cancelled;
            }

            self.delay.delay().await;
            if self.cancel.is_stop_requested() {
                return StopReason::Cancelled;
            }

            match self.process_page(params, page, summary).await {
                PageOutcome::Continue => page += 1,
                PageOutcome::Stop(reason) => return reason,
            }
        }
    }

    async fn process_page(&self, params: &SearchParams, page: u32, summary: &mut RunSummary) -> PageOutcome {
        debug!(page, "Fetching result page");
        let body = match self.source.fetch_page(params, page).await {
            Ok(body) => body,
            Err(e) => {
                warn!(page, error = %e, "Page fetch failed, stopping crawl");
                return PageOutcome::Stop(StopReason::FetchFailed {
                    page,
                    error: e.to_string(),
                });
            }
        };
        summary.pages += 1;

        let observations = self.filter_page(params, self.source.extract(&body), summary);
        if observations.is_empty() {
            info!(page, "No listings left on page, crawl complete");
            return PageOutcome::Stop(StopReason::Exhausted { page });
        }

        info!(page, count = observations.len(), "Reconciling listings");
        for observation in observations {
            if self.cancel.is_stop_requested() {
                return PageOutcome::Stop(StopReason::Cancelled);
            }
            self.reconcile(observation, summary).await;
        }

        PageOutcome::Continue
    }

    fn filter_page(
        &self,
        params: &SearchParams,
        extracted: Vec<Result<Candidate, MalformedCandidate>>,
        summary: &mut RunSummary,
    ) -> Vec<Observation> {
        let mut observations = Vec::with_capacity(extracted.len());

        for candidate in extracted {
            let mut candidate = match candidate {
                Ok(candidate) => candidate,
                Err(e) => {
                    debug!(error = %e, "Skipping malformed card");
                    summary.skipped_malformed += 1;
                    continue;
                }
            };

            // cards rarely spell out what was searched for
            if candidate.make.is_none() {
                candidate.make = Some(params.make.clone());
            }
            if candidate.model.is_none() {
                candidate.model = Some(params.model.clone());
            }

            match self.filter.apply(candidate) {
                FilterDecision::Keep(observation) => observations.push(observation),
                FilterDecision::Lease => {
                    debug!("Skipping lease offer");
                    summary.skipped_lease += 1;
                }
                FilterDecision::Malformed(e) => {
                    debug!(error = %e, "Skipping malformed card");
                    summary.skipped_malformed += 1;
                }
            }
        }

        observations
    }

    async fn reconcile(&self, observation: Observation, summary: &mut RunSummary) {
        let url = observation.url.clone();

        match self.reconcile_observation(observation, summary.run_id).await {
            Ok(Outcome::Created(id)) => {
                debug!(listing_id = id, %url, "New listing");
                summary.created += 1;
            }
            Ok(Outcome::Updated { id, price_changed }) => {
                debug!(listing_id = id, %url, price_changed, "Known listing refreshed");
                summary.updated += 1;
                if price_changed {
                    summary.price_changes += 1;
                }
            }
            Err(e) => {
                error!(%url, error = %e, "Failed to store listing");
                summary.failed += 1;
            }
        }
    }

    async fn reconcile_observation(&self, mut observation: Observation, run_id: RunId) -> Result<Outcome, StorageError> {
        let resolver = self.storage.resolver();
        let mut resolution = resolver.resolve(&observation).await?;
        let mut details = None;

        if resolution == Resolution::New {
            details = self.fetch_details(&observation.url).await;

            // the detail page may reveal a registration number that is already on file
            let detail_registration = details.as_ref().and_then(|d| d.registration_number.clone());
            if observation.registration_number.is_none() && detail_registration.is_some() {
                observation.registration_number = detail_registration;
                resolution = resolver.resolve(&observation).await?;
            }
        }

        self.storage
            .upserts()
            .reconcile(&observation, &resolution, details.as_ref(), run_id)
            .await
    }

    /// Best effort: any failure just means the listing is stored without these fields
    async fn fetch_details(&self, url: &str) -> Option<ListingDetails> {
        self.delay.delay().await;
        if self.cancel.is_stop_requested() {
            debug!(url, "Stop requested, skipping detail page");
            return None;
        }

        match self.source.fetch_details(url).await {
            Ok(Some(mut details)) => {
                details.registration_number = usable_registration(details.registration_number.as_deref());
                Some(details)
            }
            Ok(None) => {
                warn!(url, "Detail page had no usable fields");
                None
            }
            Err(e) => {
                warn!(url, error = %e, "Detail fetch failed, storing base fields only");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::delay::DelayPolicy;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted catalog: page bodies are just the page number
    #[derive(Default)]
    struct FakeCatalog {
        pages: Vec<Vec<Result<Candidate, MalformedCandidate>>>,
        fail_at_page: Option<u32>,
        details: HashMap<String, ListingDetails>,
        failing_details: bool,
        /// Request a stop from inside the nth detail fetch
        stop_on_detail_call: Option<(usize, CancellationController)>,
        detail_calls: AtomicUsize,
        fetched_pages: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl ListingSource for FakeCatalog {
        async fn fetch_page(&self, _params: &SearchParams, page: u32) -> Result<String, FetchError> {
            self.fetched_pages.lock().unwrap().push(page);
            if self.fail_at_page == Some(page) {
                return Err(FetchError::Status {
                    url: format!("https://catalog.test/bil?Page={page}"),
                    status: StatusCode::SERVICE_UNAVAILABLE,
                });
            }
            Ok(page.to_string())
        }

        fn extract(&self, body: &str) -> Vec<Result<Candidate, MalformedCandidate>> {
            let page: usize = body.parse().unwrap();
            self.pages.get(page - 1).cloned().unwrap_or_default()
        }

        async fn fetch_details(&self, url: &str) -> Result<Option<ListingDetails>, FetchError> {
            let call = self.detail_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((n, cancel)) = &self.stop_on_detail_call {
                if call == *n {
                    cancel.request_stop();
                }
            }
            if self.failing_details {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: StatusCode::GATEWAY_TIMEOUT,
                });
            }
            Ok(self.details.get(url).cloned())
        }

        fn source_name(&self) -> &'static str {
            "Fake"
        }
    }

    fn card(id: u32, price: &str) -> Result<Candidate, MalformedCandidate> {
        Ok(Candidate {
            title: format!("Tesla Model Y #{id}"),
            url: format!("https://catalog.test/bil/{id}"),
            year: Some(2023),
            mileage: Some(format!("{id} 000 mil")),
            location: Some("Stockholm".to_string()),
            price_text: price.to_string(),
            registration_number: Some(format!("REG{id:03}")),
            ..Candidate::default()
        })
    }

    fn params() -> SearchParams {
        SearchParams::new("Tesla", "Model Y").with_year(2023)
    }

    fn controller(
        catalog: FakeCatalog,
        storage: &Storage,
        cancel: CancellationController,
    ) -> PaginationController<FakeCatalog> {
        let delay = PoliteDelayScheduler::new(DelayPolicy::none(), cancel.clone());
        PaginationController::new(catalog, storage.clone(), LeaseOfferFilter::default(), delay, cancel)
    }

    async fn run(catalog: FakeCatalog, storage: &Storage) -> RunSummary {
        controller(catalog, storage, CancellationController::new())
            .run(&params())
            .await
            .unwrap()
    }

    async fn ledger_count(storage: &Storage, summary: &RunSummary) -> Option<i64> {
        storage.run(summary.run_id).await.unwrap().unwrap().total_count
    }

    #[tokio::test]
    async fn two_runs_track_a_single_price_change() {
        let storage = Storage::in_memory().await.unwrap();

        let first = run(
            FakeCatalog {
                pages: vec![vec![card(1, "100 000 kr"), card(2, "120 000 kr"), card(3, "95 000 kr")]],
                ..FakeCatalog::default()
            },
            &storage,
        )
        .await;

        assert_eq!(first.created, 3);
        assert_eq!(first.total(), 3);
        assert_eq!(first.stop_reason, Some(StopReason::Exhausted { page: 2 }));
        assert_eq!(storage.listings().await.unwrap().len(), 3);
        assert_eq!(storage.price_history_count().await.unwrap(), 0);
        assert_eq!(ledger_count(&storage, &first).await, Some(3));

        let second = run(
            FakeCatalog {
                pages: vec![vec![card(1, "100 000 kr"), card(2, "115 000 kr"), card(3, "95 000 kr")]],
                ..FakeCatalog::default()
            },
            &storage,
        )
        .await;

        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 3);
        assert_eq!(second.price_changes, 1);
        assert_eq!(ledger_count(&storage, &second).await, Some(3));

        let listings = storage.listings().await.unwrap();
        assert_eq!(listings.len(), 3);
        let changed = listings.iter().find(|l| l.url.ends_with("/bil/2")).unwrap();
        assert_eq!(changed.price, "115000");
        assert_eq!(changed.run_id, Some(second.run_id));

        let history = storage.price_history(changed.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].price, "120000");
        assert_eq!(storage.price_history_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rerun_with_same_prices_is_idempotent() {
        let storage = Storage::in_memory().await.unwrap();
        let pages = || vec![vec![card(1, "100 000 kr"), card(2, "200 000 kr")], vec![card(3, "300 000 kr")]];

        run(FakeCatalog { pages: pages(), ..FakeCatalog::default() }, &storage).await;
        let before = storage.listings().await.unwrap();

        let again = run(FakeCatalog { pages: pages(), ..FakeCatalog::default() }, &storage).await;

        assert_eq!(again.created, 0);
        assert_eq!(again.updated, 3);
        assert_eq!(storage.listings().await.unwrap().len(), 3);
        assert_eq!(storage.price_history_count().await.unwrap(), 0);

        let after = storage.listings().await.unwrap();
        for (old, new) in before.iter().zip(&after) {
            assert_eq!(old.first_seen, new.first_seen);
        }
    }

    #[tokio::test]
    async fn walks_pages_in_order_until_empty() {
        let storage = Storage::in_memory().await.unwrap();
        let controller = controller(
            FakeCatalog {
                pages: vec![vec![card(1, "1 kr")], vec![card(2, "2 kr")], vec![card(3, "3 kr")]],
                ..FakeCatalog::default()
            },
            &storage,
            CancellationController::new(),
        );

        let summary = controller.run(&params()).await.unwrap();

        assert_eq!(*controller.source.fetched_pages.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(summary.pages, 4);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.stop_reason, Some(StopReason::Exhausted { page: 4 }));
    }

    #[tokio::test]
    async fn lease_offers_leave_no_trace() {
        let storage = Storage::in_memory().await.unwrap();
        let summary = run(
            FakeCatalog {
                pages: vec![vec![card(1, "2 499 kr/mån"), card(2, "249 900 kr")]],
                ..FakeCatalog::default()
            },
            &storage,
        )
        .await;

        assert_eq!(summary.skipped_lease, 1);
        assert_eq!(summary.total(), 1);
        let listings = storage.listings().await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].price, "249900");
    }

    #[tokio::test]
    async fn page_of_only_lease_offers_ends_crawl() {
        let storage = Storage::in_memory().await.unwrap();
        let summary = run(
            FakeCatalog {
                pages: vec![vec![card(1, "2 499 kr/mån")], vec![card(2, "249 900 kr")]],
                ..FakeCatalog::default()
            },
            &storage,
        )
        .await;

        assert_eq!(summary.stop_reason, Some(StopReason::Exhausted { page: 1 }));
        assert_eq!(summary.total(), 0);
        assert!(storage.listings().await.unwrap().is_empty());
        assert_eq!(storage.price_history_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_cards_are_skipped() {
        let storage = Storage::in_memory().await.unwrap();
        let summary = run(
            FakeCatalog {
                pages: vec![vec![
                    Err(MalformedCandidate::MissingLink),
                    card(1, "Ring för pris"),
                    card(2, "150 000 kr"),
                ]],
                ..FakeCatalog::default()
            },
            &storage,
        )
        .await;

        assert_eq!(summary.skipped_malformed, 2);
        assert_eq!(summary.created, 1);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_earlier_pages() {
        let storage = Storage::in_memory().await.unwrap();
        let summary = run(
            FakeCatalog {
                pages: vec![vec![card(1, "1 kr"), card(2, "2 kr")], vec![card(3, "3 kr")]],
                fail_at_page: Some(2),
                ..FakeCatalog::default()
            },
            &storage,
        )
        .await;

        assert!(matches!(summary.stop_reason, Some(StopReason::FetchFailed { page: 2, .. })));
        assert_eq!(summary.total(), 2);
        assert_eq!(storage.listings().await.unwrap().len(), 2);
        assert_eq!(ledger_count(&storage, &summary).await, Some(2));
    }

    #[tokio::test]
    async fn cancellation_mid_page_commits_partial_count() {
        let storage = Storage::in_memory().await.unwrap();
        let cancel = CancellationController::new();

        // two listings on page one, then stop while storing the first of page two
        let catalog = FakeCatalog {
            pages: vec![
                vec![card(1, "1 kr"), card(2, "2 kr")],
                vec![card(3, "3 kr"), card(4, "4 kr"), card(5, "5 kr")],
            ],
            stop_on_detail_call: Some((3, cancel.clone())),
            ..FakeCatalog::default()
        };

        let summary = controller(catalog, &storage, cancel).run(&params()).await.unwrap();

        assert_eq!(summary.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(summary.total(), 3);
        assert_eq!(storage.listings().await.unwrap().len(), 3);
        assert_eq!(ledger_count(&storage, &summary).await, Some(3));
    }

    #[tokio::test]
    async fn stop_before_start_fetches_nothing() {
        let storage = Storage::in_memory().await.unwrap();
        let cancel = CancellationController::new();
        cancel.request_stop();

        let controller = controller(
            FakeCatalog {
                pages: vec![vec![card(1, "1 kr")]],
                ..FakeCatalog::default()
            },
            &storage,
            cancel,
        );
        let summary = controller.run(&params()).await.unwrap();

        assert!(controller.source.fetched_pages.lock().unwrap().is_empty());
        assert_eq!(summary.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(ledger_count(&storage, &summary).await, Some(0));
    }

    #[tokio::test]
    async fn details_are_fetched_for_new_listings_only() {
        let storage = Storage::in_memory().await.unwrap();
        let details = |url: &str| {
            HashMap::from([(
                url.to_string(),
                ListingDetails {
                    color: Some("Röd".to_string()),
                    gearbox: Some("Manuell".to_string()),
                    ..ListingDetails::default()
                },
            )])
        };

        let first = controller(
            FakeCatalog {
                pages: vec![vec![card(1, "1 kr")]],
                details: details("https://catalog.test/bil/1"),
                ..FakeCatalog::default()
            },
            &storage,
            CancellationController::new(),
        );
        first.run(&params()).await.unwrap();
        assert_eq!(first.source.detail_calls.load(Ordering::SeqCst), 1);

        let second = controller(
            FakeCatalog {
                pages: vec![vec![card(1, "1 kr")]],
                details: details("https://catalog.test/bil/1"),
                ..FakeCatalog::default()
            },
            &storage,
            CancellationController::new(),
        );
        second.run(&params()).await.unwrap();
        assert_eq!(second.source.detail_calls.load(Ordering::SeqCst), 0);

        let listing = &storage.listings().await.unwrap()[0];
        assert_eq!(listing.color.as_deref(), Some("Röd"));
        assert_eq!(listing.gearbox.as_deref(), Some("Manuell"));
    }

    #[tokio::test]
    async fn failed_detail_fetch_still_stores_listing() {
        let storage = Storage::in_memory().await.unwrap();
        let summary = run(
            FakeCatalog {
                pages: vec![vec![card(1, "1 kr")]],
                failing_details: true,
                ..FakeCatalog::default()
            },
            &storage,
        )
        .await;

        assert_eq!(summary.created, 1);
        let listing = &storage.listings().await.unwrap()[0];
        assert_eq!(listing.registration_number.as_deref(), Some("REG001"));
        assert_eq!(listing.color, None);
    }

    #[tokio::test]
    async fn detail_registration_matches_existing_listing() {
        let storage = Storage::in_memory().await.unwrap();
        run(
            FakeCatalog {
                pages: vec![vec![card(1, "100 kr")]],
                ..FakeCatalog::default()
            },
            &storage,
        )
        .await;

        // same car relisted under a new url, registration only on its detail page
        let mut relisted = card(1, "90 kr").unwrap();
        relisted.url = "https://catalog.test/bil/1-relisted".to_string();
        relisted.registration_number = Some("N/A".to_string());
        let summary = run(
            FakeCatalog {
                pages: vec![vec![Ok(relisted)]],
                details: HashMap::from([(
                    "https://catalog.test/bil/1-relisted".to_string(),
                    ListingDetails {
                        registration_number: Some("REG001".to_string()),
                        ..ListingDetails::default()
                    },
                )]),
                ..FakeCatalog::default()
            },
            &storage,
        )
        .await;

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.price_changes, 1);
        assert_eq!(storage.listings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn page_limit_stops_crawl() {
        let storage = Storage::in_memory().await.unwrap();
        let controller = controller(
            FakeCatalog {
                pages: vec![vec![card(1, "1 kr")], vec![card(2, "2 kr")]],
                ..FakeCatalog::default()
            },
            &storage,
            CancellationController::new(),
        )
        .with_max_pages(Some(1));

        let summary = controller.run(&params()).await.unwrap();

        assert_eq!(summary.stop_reason, Some(StopReason::PageLimit { max_pages: 1 }));
        assert_eq!(summary.total(), 1);
    }

    #[tokio::test]
    async fn search_make_and_model_fill_bare_cards() {
        let storage = Storage::in_memory().await.unwrap();
        run(
            FakeCatalog {
                pages: vec![vec![card(1, "1 kr")]],
                ..FakeCatalog::default()
            },
            &storage,
        )
        .await;

        let listing = &storage.listings().await.unwrap()[0];
        assert_eq!(listing.make.as_deref(), Some("Tesla"));
        assert_eq!(listing.model.as_deref(), Some("Model Y"));
        assert_eq!(listing.mileage.as_deref(), Some("1000"));
    }
}
