//! Settings subcommands.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use super::format::format_currency;
use super::open_store;
use crate::config::{mask_secret, Settings, ALERT_DAILY_USD, ALERT_MONTHLY_USD, ANTHROPIC_KEY, OPENAI_KEY};


/// Print the current settings with secrets masked.
pub async fn show(db_path: &Path) -> Result<()> {
    let store = open_store(db_path).await?;
    let settings = Settings::load(&store).await;

    let mut entries: Vec<(String, String)> = settings.to_map().into_iter().collect();
    entries.sort();

    for (key, value) in entries {
        let shown = if key == ANTHROPIC_KEY || key == OPENAI_KEY {
            mask_secret(&value)
        } else if key == ALERT_DAILY_USD {
            describe_threshold(settings.daily_threshold(), "alerts off")
        } else if key == ALERT_MONTHLY_USD {
            describe_threshold(settings.monthly_threshold(), "not set")
        } else if value.is_empty() {
            "(not set)".to_string()
        } else {
            value
        };
        println!("{key:<20} {shown}");
    }

    store.close().await?;
    Ok(())
}


/// Print the stored value of one setting. API keys stay masked.
pub async fn get(db_path: &Path, key: &str) -> Result<()> {
    let store = open_store(db_path).await?;
    let value = store.get_setting(key).await?;

    match value {
        Some(value) if key == ANTHROPIC_KEY || key == OPENAI_KEY => println!("{}", mask_secret(&value)),
        Some(value) => println!("{value}"),
        None => println!("(not set)"),
    }

    store.close().await?;
    Ok(())
}


/// Save `KEY=VALUE` pairs. Empty values are accepted but never persisted.
pub async fn set(db_path: &Path, pairs: &[String]) -> Result<()> {
    let updates = parse_pairs(pairs)?;

    let store = open_store(db_path).await?;
    let mut settings = Settings::load(&store).await;
    settings
        .save(&store, updates)
        .await
        .context("Failed to save settings")?;

    println!("\x1b[32m+ Settings saved\x1b[0m");
    store.close().await?;
    Ok(())
}


fn describe_threshold(threshold: Option<f64>, unset: &str) -> String {
    match threshold {
        Some(usd) => format!("${}", format_currency(usd)),
        None => format!("({unset})"),
    }
}


fn parse_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("Expected KEY=VALUE, got '{pair}'"))?;
            let key = key.trim();
            if key.is_empty() {
                anyhow::bail!("Setting key is empty in '{pair}'");
            }
            Ok((key.to_string(), value.trim().to_string()))
        })
        .collect()
}
