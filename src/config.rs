use crate::crawl::filter::DEFAULT_LEASE_MARKERS;
use crate::scrapers::bytbil::DEFAULT_BASE_URL;
use crate::scrapers::types::SearchParams;
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, read from the environment (and `.env` when present)
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub base_url: String,
    pub search: SearchParams,
    pub max_pages: Option<u32>,
    pub request_timeout: Duration,
    pub lease_markers: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let make = var("SEARCH_MAKE").context("SEARCH_MAKE must be set")?;
        let model = var("SEARCH_MODEL").context("SEARCH_MODEL must be set")?;
        let mut search = SearchParams::new(make, model);
        if let Some(year) = parse_opt::<i32>(var("SEARCH_YEAR"), "SEARCH_YEAR")? {
            search = search.with_year(year);
        }

        let lease_markers = match var("LEASE_MARKERS") {
            Some(list) => list.split(',').map(|m| m.trim().to_string()).filter(|m| !m.is_empty()).collect(),
            None => DEFAULT_LEASE_MARKERS.iter().map(|m| m.to_string()).collect(),
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:cars.db".to_string()),
            base_url: var("BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            search,
            max_pages: parse_opt(var("MAX_PAGES"), "MAX_PAGES")?,
            request_timeout: Duration::from_secs(
                parse_opt(var("REQUEST_TIMEOUT_SECS"), "REQUEST_TIMEOUT_SECS")?.unwrap_or(30),
            ),
            lease_markers,
        })
    }
}

fn parse_opt<T>(value: Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|v| v.parse::<T>().with_context(|| format!("{key} has an invalid value: {v}")))
        .transpose()
}
