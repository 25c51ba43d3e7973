pub mod carryover;
pub mod classifier;
pub mod composer;
pub mod config;
pub mod consent_rule;
pub mod date_merger;
pub mod db;
pub mod delta_queue;
pub mod error;
pub mod feed;
pub mod manifest;
pub mod normalizer;
pub mod pipeline;
pub mod sources;
pub mod types;

pub use error::{PipelineError, Result};
