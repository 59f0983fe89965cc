use std::path::Path;

use assert_cmd::Command;
use chrono::Local;
use predicates::prelude::*;
use tempfile::TempDir;


fn ttk(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ttk").unwrap();
    cmd.env("TOKEN_TRACKER_DB", db).env_remove("TOKEN_TRACKER_POLLER");
    cmd
}


fn batch_json() -> String {
    let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
    format!(
        r#"[
            {{"provider":"anthropic","model":"claude-sonnet","date":"{today}","input_tokens":1200,"output_tokens":300,"cost_usd":4.25}},
            {{"provider":"openai","model":"gpt-4o","date":"{today}","input_tokens":800,"output_tokens":200,"cost_usd":1.50}},
            {{"provider":"openai","model":"gpt-4o","date":"{today}","input_tokens":-5,"output_tokens":0,"cost_usd":0.0}}
        ]"#
    )
}


#[test]
fn ingest_reports_partial_failure_and_exits_zero() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("usage.db");

    ttk(&db)
        .arg("ingest")
        .write_stdin(batch_json())
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 2 of 3 snapshots"))
        .stdout(predicate::str::contains("openai/gpt-4o"));
}


#[test]
fn ingest_isolates_unparseable_rows() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("usage.db");
    let batch = r#"[
        {"provider":"anthropic","model":"claude","date":"2024-01-02","cost_usd":1.0},
        {"provider":"gemini","model":"pro","date":"2024-01-02","cost_usd":1.0},
        {"provider":"openai","model":"gpt-4o","date":"2024-13-45","cost_usd":1.0}
    ]"#;

    ttk(&db)
        .arg("ingest")
        .write_stdin(batch)
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 1 of 3 snapshots"))
        .stdout(predicate::str::contains("gemini/pro/2024-01-02: unknown provider: gemini"))
        .stdout(predicate::str::contains("openai/gpt-4o/2024-13-45"))
        .stderr(predicate::str::contains("2 of 3 snapshots failed to ingest"));

    ttk(&db)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"Snapshots:\s+1\n").unwrap());
}


#[test]
fn usage_with_huge_window_does_not_crash() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("usage.db");
    ttk(&db).arg("ingest").write_stdin(batch_json()).assert().success();

    ttk(&db)
        .args(["usage", "--days", "4294967295"])
        .assert()
        .success()
        .stdout(predicate::str::contains("claude-sonnet"));
}


#[test]
fn usage_shows_ingested_totals() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("usage.db");
    let file = dir.path().join("batch.json");
    std::fs::write(&file, batch_json()).unwrap();

    ttk(&db).arg("ingest").arg(&file).assert().success();

    ttk(&db)
        .args(["usage", "--days", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("API Usage: last 7 days"))
        .stdout(predicate::str::contains("claude-sonnet"))
        .stdout(predicate::str::contains("5.75"));

    ttk(&db)
        .args(["usage", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"window_days\": 30"))
        .stdout(predicate::str::contains("\"anthropic_cost\": 4.25"));
}


#[test]
fn reingesting_the_same_batch_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("usage.db");

    for _ in 0..2 {
        ttk(&db).arg("ingest").write_stdin(batch_json()).assert().success();
    }

    ttk(&db)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Snapshots:"))
        .stdout(predicate::str::is_match(r"Snapshots:\s+2\n").unwrap());
}


#[test]
fn settings_round_trip_with_masked_keys() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("usage.db");

    ttk(&db)
        .args(["settings", "set", "anthropic_key=sk-ant-secret-9876", "alert_daily_usd=12.5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Settings saved"));

    ttk(&db)
        .args(["settings", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("********9876"))
        .stdout(predicate::str::contains("sk-ant-secret").not())
        .stdout(predicate::str::contains("$12.50"));

    ttk(&db)
        .args(["settings", "get", "alert_daily_usd"])
        .assert()
        .success()
        .stdout("12.5\n");

    ttk(&db)
        .args(["settings", "get", "openai_key"])
        .assert()
        .success()
        .stdout("(not set)\n");
}


#[test]
fn settings_set_rejects_malformed_pairs() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("usage.db");

    ttk(&db)
        .args(["settings", "set", "no-equals-sign"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Expected KEY=VALUE"));
}


#[test]
fn status_on_empty_store() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("nested").join("usage.db");

    ttk(&db)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No snapshots stored yet"));
}


#[test]
fn watch_ingests_events_until_eof() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("usage.db");
    let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
    let input = format!(
        "{{\"event\":\"new-snapshots\",\"payload\":[{{\"provider\":\"anthropic\",\"model\":\"claude\",\"date\":\"{today}\",\"cost_usd\":2.0}}]}}\n{{\"event\":\"usage-updated\"}}\n"
    );

    ttk(&db)
        .arg("watch")
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::str::contains("ingested 1/1"))
        .stdout(predicate::str::contains("today $2.00"));
}


#[cfg(unix)]
#[test]
fn refresh_collects_every_poller_event() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("usage.db");
    let today = Local::now().date_naive().format("%Y-%m-%d").to_string();

    let script = dir.path().join("poll.sh");
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\n\
             echo '{{\"event\":\"usage-updated\"}}'\n\
             echo '[{{\"provider\":\"anthropic\",\"model\":\"claude-haiku\",\"date\":\"{today}\",\"cost_usd\":1.0}}]'\n\
             echo '[{{\"provider\":\"openai\",\"model\":\"gpt-4o-mini\",\"date\":\"{today}\",\"cost_usd\":2.0}}]'\n"
        ),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    ttk(&db)
        .args(["refresh", "--grace-ms", "3000", "--poller"])
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("claude-haiku"))
        .stdout(predicate::str::contains("gpt-4o-mini"))
        .stdout(predicate::str::contains("today $3.00"));
}
