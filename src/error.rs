use crate::models::RunId;
use reqwest::StatusCode;
use thiserror::Error;

/// A page or detail request that did not produce a usable body
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url} answered with status {status}")]
    Status { url: String, status: StatusCode },

    /// Connection failures and timeouts
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not build request url")]
    InvalidUrl(#[from] url::ParseError),
}

/// Extractor output missing something a listing cannot exist without
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedCandidate {
    #[error("listing card has no title")]
    MissingTitle,

    #[error("listing card has no link")]
    MissingLink,

    #[error("price {0:?} has no digits left after normalization")]
    UnusablePrice(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("could not serialize search parameters")]
    Serialize(#[from] serde_json::Error),

    #[error("run {0} does not exist or was already finished")]
    RunNotOpen(RunId),
}
