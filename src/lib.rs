pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod pipeline_config;
pub mod tracker;

pub use models::{
    ClassificationResult, ConflictRecord, ConflictReview, EmailMessage, JobRecord, JobStatus,
    ManualRecordInput, ParseResult, RecordSource, RecordUpdate, ResolutionAuditEntry,
};
pub use pipeline_config::EngineConfig;
pub use tracker::{
    ConflictDecision, EditOutcome, IngestOutcome, JobTracker, ManualRecordOutcome, SkipReason,
    TrackerError,
};

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. `RUST_LOG` wins over the built-in filter.
/// Calling it twice is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();

    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);
}
