//! Terminal rendering helpers shared by commands.

use chrono::NaiveDate;

use crate::aggregation::TodaySummary;
use crate::alerts::AlertOutcome;
use crate::cache::{CacheState, UsageData, UsageView};
use crate::ingest::{IngestReport, RefreshOutcome};
use crate::session::SessionUpdate;


/// Format a number with commas.
pub fn format_number(n: i64) -> String {
    let s = n.unsigned_abs().to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    if n < 0 {
        format!("-{result}")
    } else {
        result
    }
}


/// Format currency with 2 decimal places and commas.
pub fn format_currency(n: f64) -> String {
    let formatted = format!("{:.2}", n.abs());
    let (integer_part, decimal_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let mut result = String::new();
    let chars: Vec<char> = integer_part.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    let sign = if n < 0.0 { "-" } else { "" };
    format!("{sign}{result}.{decimal_part}")
}


/// Format currency with 4 decimal places.
pub fn format_currency_4(n: f64) -> String {
    format!("{:.4}", n)
}


pub fn print_ingest_report(report: &IngestReport) {
    println!(
        "Applied {} of {} snapshots",
        report.applied,
        report.total()
    );
    for failed in &report.failed {
        println!("\x1b[33m  ! {}: {}\x1b[0m", failed.key, failed.reason);
    }
}


pub fn print_today(today: &TodaySummary) {
    println!("TODAY");
    println!("{}", "-".repeat(40));
    println!(
        "  Anthropic:  ${:>12}  {:>14} tokens",
        format_currency(today.anthropic_cost),
        format_number(today.anthropic_tokens)
    );
    println!(
        "  OpenAI:     ${:>12}  {:>14} tokens",
        format_currency(today.openai_cost),
        format_number(today.openai_tokens)
    );
    println!("  Total:      ${:>12}", format_currency(today.total_cost()));
}


pub fn print_view(view: &UsageView, today: NaiveDate) {
    println!("\n{}", "=".repeat(60));
    println!("{:^60}", format!("API Usage: last {} days", view.window_days));
    println!("{}\n", "=".repeat(60));

    if view.snapshots.is_empty() {
        println!("No usage recorded since {}.", view.cutoff);
        return;
    }

    print_today(&view.today(today));

    println!("\nDAILY COST");
    println!("{}", "-".repeat(60));
    println!("  {:<12} {:>13} {:>13} {:>13}", "Date", "Anthropic", "OpenAI", "Total");
    for day in &view.daily_totals {
        println!(
            "  {:<12} {:>13} {:>13} {:>13}",
            day.date.to_string(),
            format_currency(day.anthropic_cost),
            format_currency(day.openai_cost),
            format_currency(day.total_cost)
        );
    }

    println!("\nUSAGE BY MODEL");
    println!("{}", "-".repeat(60));
    for model in &view.model_totals {
        println!(
            "  {:<10} {:30} {:>14} ${:>10}",
            model.provider.to_string(),
            model.model,
            format_number(model.total_tokens),
            format_currency_4(model.cost_usd)
        );
    }
}


/// One status line per session update.
pub fn print_update(update: &SessionUpdate) {
    let mut parts = vec![format!(
        "today ${} ({} tokens), {} rows in window",
        format_currency(update.today.total_cost()),
        format_number(update.today.total_tokens()),
        update.view.snapshots.len()
    )];

    if let Some(report) = &update.ingest {
        parts.push(format!("ingested {}/{}", report.applied, report.total()));
    }
    match update.refresh {
        Some(RefreshOutcome::Pushed) => parts.push("refreshed".to_string()),
        Some(RefreshOutcome::TimedOut) => parts.push("refreshed (no new data)".to_string()),
        None => {}
    }
    match &update.alert {
        AlertOutcome::Delivered { threshold, .. } => {
            parts.push(format!("alert sent at ${}", format_currency(*threshold)))
        }
        AlertOutcome::PermissionDenied => parts.push("alert suppressed".to_string()),
        AlertOutcome::DeliveryFailed(e) => parts.push(format!("alert failed: {e}")),
        _ => {}
    }

    println!("{}", parts.join(" | "));
    if let Some(report) = &update.ingest {
        for failed in &report.failed {
            println!("\x1b[33m  ! {}: {}\x1b[0m", failed.key, failed.reason);
        }
    }
}


/// Describe what the cache still holds after a failed fetch.
pub fn print_stale(data: &UsageData) {
    let mut line = format!("  cache {}", data.state.as_str());
    if data.is_loading {
        line.push_str(", refetch in progress");
    }
    match &data.view {
        Some(view) if data.state == CacheState::Error => line.push_str(&format!(
            ", last good data has {} rows since {}",
            view.snapshots.len(),
            view.cutoff
        )),
        Some(_) => {}
        None => line.push_str(", nothing cached yet"),
    }
    eprintln!("{line}");
}
