//! Ingestion of provider usage snapshots.

mod pipeline;

pub use pipeline::{
    IngestReport,
    IngestionPipeline,
    RefreshOutcome,
};
