//! Aggregation layer for usage snapshots.

mod usage_totals;

pub use usage_totals::{
    daily_totals,
    model_totals,
    today_summary,
    DailyTotal,
    ModelTotal,
    TodaySummary,
};
