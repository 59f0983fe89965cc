//! Data models for provider usage snapshots.

mod usage_snapshot;

pub use usage_snapshot::{
    format_date,
    parse_date,
    row_key,
    Provider,
    UsageSnapshot,
};
