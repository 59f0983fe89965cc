//! Long-running tracking sessions.

mod tracker;

pub use tracker::{SessionUpdate, Tracker};
