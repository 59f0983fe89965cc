//! Daily spend threshold alerts.

use chrono::NaiveDate;

use super::notifier::{Notifier, PermissionStatus};
use crate::cache::UsageView;
use crate::config::Settings;


pub const ALERT_TITLE: &str = "Token Tracker: Spending Alert";


/// What one evaluation decided.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    /// No positive daily threshold configured.
    Disabled,
    BelowThreshold,
    /// Still over the threshold, already notified for this crossing.
    AlreadyNotified,
    Delivered { total: f64, threshold: f64 },
    /// Permission was refused. Nothing sent; asked again next time.
    PermissionDenied,
    DeliveryFailed(String),
}


/// Fires a notification once each time today's spend crosses the daily threshold.
///
/// The alert re-arms when the total drops back below the threshold or the
/// calendar day changes.
pub struct AlertEvaluator<N> {
    notifier: N,
    notified_on: Option<NaiveDate>,
}


impl<N: Notifier> AlertEvaluator<N> {
    pub fn new(notifier: N) -> Self {
        Self {
            notifier,
            notified_on: None,
        }
    }

    /// Evaluate against today's total in `view`.
    pub async fn evaluate(
        &mut self,
        settings: &Settings,
        view: &UsageView,
        today: NaiveDate,
    ) -> AlertOutcome {
        let total = view.today(today).total_cost();
        self.check(settings.daily_threshold(), total, today).await
    }

    pub async fn check(&mut self, threshold: Option<f64>, total: f64, today: NaiveDate) -> AlertOutcome {
        let Some(threshold) = threshold else {
            self.notified_on = None;
            return AlertOutcome::Disabled;
        };

        if total < threshold {
            if self.notified_on.take().is_some() {
                tracing::info!(total, threshold, "daily spend back under threshold, alert re-armed");
            }
            return AlertOutcome::BelowThreshold;
        }

        if self.notified_on == Some(today) {
            return AlertOutcome::AlreadyNotified;
        }

        if !self.ensure_permission().await {
            tracing::info!("notification permission denied, alert suppressed");
            return AlertOutcome::PermissionDenied;
        }

        let body = format!(
            "Today's API spend ${total:.2} has reached your ${threshold:.2} daily threshold."
        );
        match self.notifier.send_notification(ALERT_TITLE, &body).await {
            Ok(()) => {
                tracing::info!(total, threshold, "daily spend alert delivered");
                self.notified_on = Some(today);
                AlertOutcome::Delivered { total, threshold }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to deliver spend alert");
                AlertOutcome::DeliveryFailed(e.to_string())
            }
        }
    }

    async fn ensure_permission(&self) -> bool {
        if self.notifier.is_permission_granted().await {
            return true;
        }
        self.notifier.request_permission().await == PermissionStatus::Granted
    }
}
