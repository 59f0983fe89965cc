//! Inbound event signals and listener registration.

mod bus;

pub use bus::{EventBus, ListenerHandle, UsageEvent};
