//! Spending alerts.

mod evaluator;
pub mod notifier;

pub use evaluator::{AlertEvaluator, AlertOutcome};
pub use notifier::{Notifier, StderrNotifier};
