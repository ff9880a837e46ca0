use crate::error::{FetchError, MalformedCandidate};
use crate::models::{Candidate, ListingDetails};
use crate::scrapers::traits::ListingSource;
use crate::scrapers::types::SearchParams;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://www.bytbil.com";

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_0_0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_0_0) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_0_0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
];

/// Chance of switching user agent after each result page
const AGENT_ROTATION_CHANCE: f64 = 0.3;

/// Cookies the catalog expects before it serves car results
const SESSION_COOKIES: [&str; 3] = [
    "bb.vehicletype=car; Path=/",
    "takeover=true; Path=/",
    "bb.filters_toggled=true; Path=/",
];

/// Bytbil catalog client and markup extractor
pub struct BytbilScraper {
    client: Client,
    base_url: Url,
    user_agent: Mutex<&'static str>,
}

impl BytbilScraper {
    /// Create a scraper against the public catalog
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_BASE_URL, Duration::from_secs(30))
    }

    /// Create a scraper against a custom base url with the given request timeout
    pub fn with_config(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid catalog base url")?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("sv-SE,sv;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        let referer = base_url.join("bil").context("Invalid catalog base url")?;
        headers.insert(
            header::REFERER,
            HeaderValue::from_str(referer.as_str()).context("Invalid referer header")?,
        );

        // Seeded jar; whatever the search page sets is sent back on later requests
        let jar = Jar::default();
        for cookie in SESSION_COOKIES {
            jar.add_cookie_str(cookie, &base_url);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .cookie_provider(Arc::new(jar))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            user_agent: Mutex::new(USER_AGENTS[fastrand::usize(..USER_AGENTS.len())]),
        })
    }

    /// Full url of one result page
    pub fn page_url(&self, params: &SearchParams, page: u32) -> Result<Url, FetchError> {
        let search = self.base_url.join("bil")?;
        Ok(Url::parse_with_params(search.as_str(), params.query_pairs(page))?)
    }

    fn current_agent(&self) -> &'static str {
        match self.user_agent.lock() {
            Ok(agent) => *agent,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn maybe_rotate_agent(&self) {
        if fastrand::f64() >= AGENT_ROTATION_CHANCE {
            return;
        }
        if let Ok(mut agent) = self.user_agent.lock() {
            *agent = USER_AGENTS[fastrand::usize(..USER_AGENTS.len())];
            debug!("Rotated user agent");
        }
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, self.current_agent())
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Bytbil returned status: {}", status);
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        response.text().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })
    }

    fn parse_card(&self, card: ElementRef<'_>) -> Result<Candidate, MalformedCandidate> {
        let link = card
            .select(&selector("h3.car-list-header a"))
            .next()
            .ok_or(MalformedCandidate::MissingTitle)?;

        let title = collapse_whitespace(&link.text().collect::<String>());
        if title.is_empty() {
            return Err(MalformedCandidate::MissingTitle);
        }

        let href = link
            .value()
            .attr("href")
            .filter(|href| !href.trim().is_empty())
            .ok_or(MalformedCandidate::MissingLink)?;
        let url = self
            .base_url
            .join(href.trim())
            .map_err(|_| MalformedCandidate::MissingLink)?;

        let text_of = |css: &'static str| {
            card.select(&selector(css))
                .next()
                .map(|el| collapse_whitespace(&el.text().collect::<String>()))
                .filter(|text| !text.is_empty())
        };

        let attr_of = |name: &str| {
            card.value()
                .attr(name)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let year = text_of(".car-year").and_then(|year| {
            year.chars()
                .filter(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .ok()
        });

        Ok(Candidate {
            title,
            url: url.to_string(),
            make: attr_of("data-make"),
            model: attr_of("data-model"),
            year,
            mileage: text_of(".car-mileage"),
            location: text_of(".car-dealer-location"),
            price_text: text_of(".car-price-main").unwrap_or_default(),
            registration_number: attr_of("data-regno"),
        })
    }

    /// Parse the spec table on a listing page
    pub fn parse_details(html: &str) -> Option<ListingDetails> {
        let document = Html::parse_document(html);
        let terms = selector("dl.object-info-list dt");

        let mut details = ListingDetails::default();
        for term in document.select(&terms) {
            // a term without its own value is skipped, never paired with the next one
            let Some(value) = term
                .next_siblings()
                .find_map(ElementRef::wrap)
                .filter(|el| el.value().name() == "dd")
            else {
                continue;
            };

            let label = collapse_whitespace(&term.text().collect::<String>()).to_lowercase();
            let value = collapse_whitespace(&value.text().collect::<String>());
            if value.is_empty() {
                continue;
            }

            let slot = match label.trim_end_matches(':') {
                "regnummer" | "registreringsnummer" => &mut details.registration_number,
                "färg" => &mut details.color,
                "drivhjul" | "drivning" => &mut details.drive_type,
                "växellåda" => &mut details.gearbox,
                "kaross" | "karosseri" | "biltyp" => &mut details.body_type,
                _ => continue,
            };
            *slot = Some(value);
        }

        if details.is_empty() {
            None
        } else {
            Some(details)
        }
    }
}

#[async_trait]
impl ListingSource for BytbilScraper {
    async fn fetch_page(&self, params: &SearchParams, page: u32) -> Result<String, FetchError> {
        let url = self.page_url(params, page)?;
        debug!("Fetching URL: {}", url);

        let body = self.get_text(url.as_str()).await?;
        debug!("Downloaded {} bytes of HTML", body.len());

        self.maybe_rotate_agent();
        Ok(body)
    }

    fn extract(&self, body: &str) -> Vec<Result<Candidate, MalformedCandidate>> {
        let document = Html::parse_document(body);
        let cards: Vec<_> = document
            .select(&selector("li.result-list-item"))
            .map(|card| self.parse_card(card))
            .collect();

        info!("Found {} listing cards in HTML", cards.len());
        cards
    }

    async fn fetch_details(&self, url: &str) -> Result<Option<ListingDetails>, FetchError> {
        let html = self.get_text(url).await?;
        Ok(Self::parse_details(&html))
    }

    fn source_name(&self) -> &'static str {
        "Bytbil"
    }
}

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("hard-coded selector is valid")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
