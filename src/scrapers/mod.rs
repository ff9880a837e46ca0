pub mod bytbil;
pub mod traits;
pub mod types;

pub use bytbil::BytbilScraper;
pub use traits::ListingSource;
pub use types::SearchParams;
