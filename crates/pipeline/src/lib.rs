//! Round extraction pipeline.
//!
//! Two sources (WebSocket frames and periodic content reads) feed one bounded
//! intake queue. A single normalizer task turns each candidate into at most
//! one [`RoundEvent`](roundcast_core_types::RoundEvent) and publishes it on an
//! [`EventBus`](roundcast_event_bus::EventBus), usually the viewer hub.

use thiserror::Error;

pub mod config;
pub mod extractor;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;
pub mod sources;

pub use config::{CoalesceAnchor, PipelineConfig, DEFAULT_LOOKUP_RULES};
pub use extractor::{DecimalPatternRule, ExtractionRule, StructuredFieldRule, ValueExtractor};
pub use normalizer::Deduplicator;
pub use pipeline::{Pipeline, PipelineHandle, PipelineReport, PipelineStatus, SourceState};
pub use sources::{
    AdapterFrameFeed, AdapterProbe, ContentProbe, FrameFeed, FrameSource, PollSource,
    SourceUpdate,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid extraction pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("pipeline has no sources configured")]
    NoSources,
    #[error("content probe failed: {0}")]
    Probe(#[from] cdp_adapter::AdapterError),
}
