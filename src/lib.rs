// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod report;

// text keys and matching
pub mod normalize;
pub mod similarity;
pub mod dedup;
pub mod relevance;

// placement
pub mod geo;
pub mod pin;
pub mod cluster;

// fetching and session lifecycle
pub mod cache;
pub mod schedule;
pub mod fetch;
pub mod pipeline;
pub mod store;
pub mod summary;
pub mod session;

pub mod geolocation;
pub mod config;
pub mod metrics;
pub mod api;

pub use crate::api::{router, AppState};
pub use crate::config::PipelineConfig;
pub use crate::pipeline::{run_pipeline, PipelineOutput};
pub use crate::report::{Report, ReportKind};
pub use crate::session::{Session, SessionDeps};
