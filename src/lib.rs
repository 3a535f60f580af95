//! trendlens: daily repository features labeled by whether the repository
//! trends within the following week.

pub mod aggregator;
pub mod config;
pub mod enricher;
pub mod error;
pub mod history;
pub mod labeler;
pub mod model;
pub mod pipeline;
pub mod retry;
pub mod sink;
pub mod sources;
pub mod staging;

pub use aggregator::{EventRateAggregator, RateTable, SampledHours};
pub use config::Config;
pub use enricher::{BatchOptions, BatchOutcome, FeatureMerger, SourceToggles};
pub use error::{Result, TrendError};
pub use history::TrendingHistory;
pub use labeler::TrendLabeler;
pub use model::{FeatureRecord, LabelDistribution, TrendLabel};
pub use pipeline::{Pipeline, PipelineOptions, RunSummary};
pub use sink::{FeatureSink, MemorySink, SqliteSink};
pub use staging::StagingArea;
