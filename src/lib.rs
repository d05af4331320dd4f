//! Today's building upgrades and course completions for a Leitstellenspiel
//! account, collected from the game's endpoints and served from a
//! short-lived cache.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod membership;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod source;
pub mod today;

pub use cache::{Aggregation, CacheManager, CacheState};
pub use config::Config;
pub use error::OverviewError;
pub use event::{AggregationResult, Category, CompletionEvent};
pub use pipeline::Pipeline;
