//! Boundary to the external usage poller.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::config::Settings;
use crate::events::{EventBus, UsageEvent};


/// Something that can be asked to run one fetch cycle right now.
///
/// The call is fire-and-forget: results, if any, arrive later as events.
#[async_trait]
pub trait Poller: Send + Sync {
    async fn trigger_refresh(&self);
}


/// Used when no poller is configured. Refreshes just re-derive from the store.
pub struct NoopPoller;


#[async_trait]
impl Poller for NoopPoller {
    async fn trigger_refresh(&self) {
        tracing::debug!("no poller configured, refresh is store-only");
    }
}


/// Runs an external command once per trigger and publishes what it prints.
///
/// Each stdout line may be an event object (`{"event":"new-snapshots",...}`)
/// or a bare JSON array of snapshots. Provider keys from the settings are
/// passed as upper-cased environment variables (`ANTHROPIC_KEY`, ...).
pub struct CommandPoller {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    bus: EventBus,
}


impl CommandPoller {
    pub fn new(program: impl Into<String>, args: Vec<String>, bus: EventBus) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            bus,
        }
    }

    /// Build from a whitespace-separated command line. `None` if it is blank.
    pub fn from_command_line(command_line: &str, bus: EventBus) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect(), bus))
    }

    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.env = settings
            .provider_keys()
            .into_iter()
            .map(|(key, value)| (key.to_uppercase(), value.to_string()))
            .collect();
        self
    }

    async fn run_once(program: String, args: Vec<String>, env: Vec<(String, String)>, bus: EventBus) {
        let mut child = match Command::new(&program)
            .args(&args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(%program, error = %e, "failed to start poller");
                return;
            }
        };

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_poller_line(&line) {
                            bus.publish(event);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(%program, error = %e, "failed reading poller output");
                        break;
                    }
                }
            }
        }

        match child.wait().await {
            Ok(status) if !status.success() => {
                tracing::warn!(%program, %status, "poller exited unsuccessfully");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(%program, error = %e, "failed waiting for poller"),
        }
    }
}


#[async_trait]
impl Poller for CommandPoller {
    async fn trigger_refresh(&self) {
        tracing::debug!(program = %self.program, "triggering poller");
        tokio::spawn(Self::run_once(
            self.program.clone(),
            self.args.clone(),
            self.env.clone(),
            self.bus.clone(),
        ));
    }
}


/// Interpret one line of poller output. Blank and unparseable lines yield `None`.
pub fn parse_poller_line(line: &str) -> Option<UsageEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Ok(event) = UsageEvent::from_json_line(line) {
        return Some(event);
    }
    match serde_json::from_str::<Vec<Value>>(line) {
        Ok(batch) => Some(UsageEvent::NewSnapshots(batch)),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unrecognised poller output");
            None
        }
    }
}
