pub mod cancel;
pub mod delay;
pub mod filter;
pub mod pagination;

pub use cancel::CancellationController;
pub use delay::{DelayPolicy, PoliteDelayScheduler};
pub use filter::LeaseOfferFilter;
pub use pagination::{PaginationController, RunSummary, StopReason};
