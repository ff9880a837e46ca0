//! Incremental crawler for the Bytbil car catalog.
//!
//! Listings are stored once per car, identified by registration number or,
//! failing that, by url. Every price change appends the previous price to
//! the listing's history, and every crawl leaves one row in the run ledger.

pub mod config;
pub mod crawl;
pub mod error;
pub mod models;
pub mod scrapers;
pub mod storage;
