//! Query cache over the usage store.

mod query_cache;

pub use query_cache::{CacheState, QueryError, UsageCache, UsageData, UsageView};
