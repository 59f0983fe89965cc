//! Usage snapshot models for provider billing data.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;


/// Errors raised when a snapshot fails validation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("{field} must be non-negative, got {value}")]
    NegativeCounter { field: &'static str, value: i64 },

    #[error("cost_usd must be a non-negative finite amount, got {0}")]
    InvalidCost(f64),

    #[error("model identifier is empty")]
    EmptyModel,

    #[error("malformed snapshot: {0}")]
    Malformed(String),
}


/// LLM provider a snapshot was billed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAi,
}


impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Anthropic, Provider::OpenAi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
        }
    }
}


impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


impl FromStr for Provider {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" => Ok(Provider::Anthropic),
            "openai" => Ok(Provider::OpenAi),
            other => Err(SnapshotError::UnknownProvider(other.to_string())),
        }
    }
}


/// Identity of a snapshot row: one provider, model and day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SnapshotKey {
    pub provider: Provider,
    pub model: String,
    pub date: NaiveDate,
}


impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.provider, self.model, self.date.format("%Y-%m-%d"))
    }
}


/// Latest known usage totals for a (provider, model, day) triple.
///
/// A later snapshot for the same key replaces the earlier one; the counters are
/// day totals as reported by the provider, not deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub provider: Provider,
    pub model: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub cache_tokens: i64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
}


impl UsageSnapshot {
    pub fn new(provider: Provider, model: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: None,
            provider,
            model: model.into(),
            date,
            input_tokens: 0,
            output_tokens: 0,
            cache_tokens: 0,
            cost_usd: 0.0,
            fetched_at: Utc::now(),
        }
    }

    #[cfg(test)]
    pub fn with_tokens(mut self, input: i64, output: i64, cache: i64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self.cache_tokens = cache;
        self
    }

    #[cfg(test)]
    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            provider: self.provider,
            model: self.model.clone(),
            date: self.date,
        }
    }

    /// Convert one raw row of an inbound batch.
    ///
    /// Provider and date are checked first so their errors name the bad value.
    pub fn from_row(row: &Value) -> Result<Self, SnapshotError> {
        if let Some(provider) = str_field(row, "provider") {
            provider.parse::<Provider>()?;
        }
        if let Some(date) = str_field(row, "date") {
            parse_date(date)?;
        }
        serde_json::from_value(row.clone()).map_err(|e| SnapshotError::Malformed(e.to_string()))
    }

    /// Input plus output tokens. Cache tokens are tracked but not counted.
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }

    /// Day key in YYYY-MM-DD format, as stored.
    pub fn date_key(&self) -> String {
        format_date(self.date)
    }

    /// Check counters and cost before the row reaches the store.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.model.trim().is_empty() {
            return Err(SnapshotError::EmptyModel);
        }
        for (field, value) in [
            ("input_tokens", self.input_tokens),
            ("output_tokens", self.output_tokens),
            ("cache_tokens", self.cache_tokens),
        ] {
            if value < 0 {
                return Err(SnapshotError::NegativeCounter { field, value });
            }
        }
        if !self.cost_usd.is_finite() || self.cost_usd < 0.0 {
            return Err(SnapshotError::InvalidCost(self.cost_usd));
        }
        Ok(())
    }
}


/// `provider/model/date` of a raw row, with `?` for whatever is missing.
///
/// Names rows that could not be converted into a [`UsageSnapshot`].
pub fn row_key(row: &Value) -> String {
    format!(
        "{}/{}/{}",
        str_field(row, "provider").unwrap_or("?"),
        str_field(row, "model").unwrap_or("?"),
        str_field(row, "date").unwrap_or("?"),
    )
}


fn str_field<'a>(row: &'a Value, name: &str) -> Option<&'a str> {
    row.get(name).and_then(Value::as_str)
}


pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}


pub fn parse_date(value: &str) -> Result<NaiveDate, SnapshotError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| SnapshotError::InvalidDate(value.to_string()))
}


#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn test_provider_round_trips_through_str() {
        for provider in Provider::ALL {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
        assert_eq!(
            "gemini".parse::<Provider>(),
            Err(SnapshotError::UnknownProvider("gemini".to_string()))
        );
    }

    #[test]
    fn test_deserialize_defaults_missing_counters() {
        let json = r#"{"provider":"openai","model":"gpt-4o","date":"2024-01-02"}"#;
        let snapshot: UsageSnapshot = serde_json::from_str(json).unwrap();

        assert_eq!(snapshot.provider, Provider::OpenAi);
        assert_eq!(snapshot.date, day("2024-01-02"));
        assert_eq!(snapshot.input_tokens, 0);
        assert_eq!(snapshot.cost_usd, 0.0);
        assert!(snapshot.id.is_none());
    }

    #[test]
    fn test_serialize_uses_iso_date_and_lowercase_provider() {
        let snapshot = UsageSnapshot::new(Provider::Anthropic, "claude-sonnet-4", day("2024-03-09"));
        let value = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(value["provider"], "anthropic");
        assert_eq!(value["date"], "2024-03-09");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_validate_rejects_negative_and_non_finite() {
        let base = UsageSnapshot::new(Provider::Anthropic, "claude", day("2024-01-01"));

        assert!(base.clone().with_tokens(1, 2, 3).validate().is_ok());
        assert_eq!(
            base.clone().with_tokens(0, -5, 0).validate(),
            Err(SnapshotError::NegativeCounter { field: "output_tokens", value: -5 })
        );
        assert!(base.clone().with_cost(-0.01).validate().is_err());
        assert!(base.clone().with_cost(f64::NAN).validate().is_err());

        let mut blank = base;
        blank.model = "  ".to_string();
        assert_eq!(blank.validate(), Err(SnapshotError::EmptyModel));
    }

    #[test]
    fn test_total_tokens_excludes_cache() {
        let snapshot = UsageSnapshot::new(Provider::OpenAi, "gpt-4o", day("2024-01-01"))
            .with_tokens(100, 200, 50);
        assert_eq!(snapshot.total_tokens(), 300);
    }

    #[test]
    fn test_from_row_reports_the_offending_field() {
        let good = serde_json::json!({"provider":"anthropic","model":"claude","date":"2024-01-05","cost_usd":2.0});
        assert_eq!(UsageSnapshot::from_row(&good).unwrap().cost_usd, 2.0);

        let provider = serde_json::json!({"provider":"gemini","model":"pro","date":"2024-01-05"});
        assert_eq!(
            UsageSnapshot::from_row(&provider),
            Err(SnapshotError::UnknownProvider("gemini".to_string()))
        );

        let date = serde_json::json!({"provider":"openai","model":"gpt-4o","date":"2024-13-45"});
        assert_eq!(
            UsageSnapshot::from_row(&date),
            Err(SnapshotError::InvalidDate("2024-13-45".to_string()))
        );

        let counters = serde_json::json!({"provider":"openai","model":"gpt-4o","date":"2024-01-05","input_tokens":"many"});
        assert!(matches!(UsageSnapshot::from_row(&counters), Err(SnapshotError::Malformed(_))));
    }

    #[test]
    fn test_row_key_marks_missing_fields() {
        let row = serde_json::json!({"provider":"gemini","date":"2024-01-05"});
        assert_eq!(row_key(&row), "gemini/?/2024-01-05");
        assert_eq!(row_key(&serde_json::json!(42)), "?/?/?");
    }

    #[test]
    fn test_key_display() {
        let snapshot = UsageSnapshot::new(Provider::OpenAi, "gpt-4o", day("2024-01-05"));
        assert_eq!(snapshot.key().to_string(), "openai/gpt-4o/2024-01-05");
    }
}
