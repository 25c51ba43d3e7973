// crates/vindelta-core/src/error.rs

use thiserror::Error;

use crate::types::CarryoverPhase;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Feed could not be read: {0}")]
    FeedRead(String),

    #[error("{source_name} query failed: {detail}")]
    SourceQuery {
        source_name: &'static str,
        detail: String,
    },

    #[error("Delta queue insert failed: {0}")]
    QueueInsert(String),

    #[error("Delta queue state update failed during {phase} resolution: {detail}")]
    StateUpdate {
        phase: CarryoverPhase,
        detail: String,
    },

    #[error("VIN {0} received more than one provenance tag")]
    DuplicateProvenance(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
