pub mod cache;
pub mod event_parser;
pub mod fetcher;
pub mod match_parser;
pub mod pricing;
pub mod rollup;
pub mod scoring;
pub mod sync;

pub use cache::{CacheCoordinator, CacheStore};
pub use fetcher::Fetcher;
pub use sync::SyncService;
