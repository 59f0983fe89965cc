//! Per-day and per-model totals derived from usage snapshots.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{Provider, UsageSnapshot};


/// Cost for a single day, split by provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub anthropic_cost: f64,
    pub openai_cost: f64,
    pub total_cost: f64,
}


impl DailyTotal {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            anthropic_cost: 0.0,
            openai_cost: 0.0,
            total_cost: 0.0,
        }
    }

    fn add(&mut self, snapshot: &UsageSnapshot) {
        match snapshot.provider {
            Provider::Anthropic => self.anthropic_cost += snapshot.cost_usd,
            Provider::OpenAi => self.openai_cost += snapshot.cost_usd,
        }
        self.total_cost += snapshot.cost_usd;
    }
}


/// Tokens and cost for one model over the whole window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelTotal {
    pub provider: Provider,
    pub model: String,
    pub total_tokens: i64,
    pub cost_usd: f64,
}


/// Cost and token totals for one day, per provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TodaySummary {
    pub anthropic_cost: f64,
    pub openai_cost: f64,
    pub anthropic_tokens: i64,
    pub openai_tokens: i64,
}


impl TodaySummary {
    pub fn total_cost(&self) -> f64 {
        self.anthropic_cost + self.openai_cost
    }

    pub fn total_tokens(&self) -> i64 {
        self.anthropic_tokens + self.openai_tokens
    }
}


/// Group snapshots by date, ascending.
///
/// Costs are summed in input order so repeated runs over the same rows give
/// bit-identical totals.
pub fn daily_totals(snapshots: &[UsageSnapshot]) -> Vec<DailyTotal> {
    let mut by_date: BTreeMap<NaiveDate, DailyTotal> = BTreeMap::new();

    for snapshot in snapshots {
        by_date
            .entry(snapshot.date)
            .or_insert_with(|| DailyTotal::empty(snapshot.date))
            .add(snapshot);
    }

    by_date.into_values().collect()
}


/// Group snapshots by (provider, model), highest cost first.
///
/// Models with equal cost keep the order in which they first appeared.
pub fn model_totals(snapshots: &[UsageSnapshot]) -> Vec<ModelTotal> {
    let mut totals: Vec<ModelTotal> = Vec::new();
    let mut index: HashMap<(Provider, &str), usize> = HashMap::new();

    for snapshot in snapshots {
        let slot = *index
            .entry((snapshot.provider, snapshot.model.as_str()))
            .or_insert_with(|| {
                totals.push(ModelTotal {
                    provider: snapshot.provider,
                    model: snapshot.model.clone(),
                    total_tokens: 0,
                    cost_usd: 0.0,
                });
                totals.len() - 1
            });

        let total = &mut totals[slot];
        total.total_tokens += snapshot.total_tokens();
        total.cost_usd += snapshot.cost_usd;
    }

    // sort_by is stable, which gives the tie-break for free
    totals.sort_by(|a, b| b.cost_usd.total_cmp(&a.cost_usd));
    totals
}


/// Per-provider cost and tokens for `today`.
pub fn today_summary(snapshots: &[UsageSnapshot], today: NaiveDate) -> TodaySummary {
    let mut summary = TodaySummary::default();

    for snapshot in snapshots.iter().filter(|s| s.date == today) {
        match snapshot.provider {
            Provider::Anthropic => {
                summary.anthropic_cost += snapshot.cost_usd;
                summary.anthropic_tokens += snapshot.total_tokens();
            }
            Provider::OpenAi => {
                summary.openai_cost += snapshot.cost_usd;
                summary.openai_tokens += snapshot.total_tokens();
            }
        }
    }

    summary
}
