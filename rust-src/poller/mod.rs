//! Poller boundary: triggering external fetch cycles.

mod command;

pub use command::{parse_poller_line, CommandPoller, NoopPoller, Poller};
