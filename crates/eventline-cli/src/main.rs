//! # eventline
//!
//! Tails a server-sent-events endpoint and prints every dispatched event to
//! stdout as one JSON object per line. Logs go to stderr.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::Parser;
use eventline_client::{ConnectorConfig, StreamConnector};
use eventline_core::logging::init_subscriber;
use eventline_core::{ConnectionState, StreamError, StreamEvent, WILDCARD_EVENT_TYPE};
use eventline_settings::EventlineSettings;
use reqwest::header::{HeaderName, HeaderValue};
use tracing::{info, warn};

/// Tail a server-sent-events stream.
#[derive(Parser, Debug)]
#[command(name = "eventline", about = "Tail a server-sent-events stream")]
struct Cli {
    /// Event stream URL.
    url: String,

    /// Only print events of this type (repeatable; default: all).
    #[arg(long = "event", value_name = "TYPE")]
    events: Vec<String>,

    /// Extra request header as `NAME:VALUE` (repeatable).
    #[arg(long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Settings file (defaults to `~/.eventline/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Give up after this many retries (0 = never).
    #[arg(long)]
    max_retries: Option<u32>,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut EventlineSettings) {
        for (name, value) in &self.headers {
            let _ = settings
                .connector
                .headers
                .insert(name.clone(), value.clone());
        }
        if let Some(max_retries) = self.max_retries {
            settings.connector.reconnect.max_retries = max_retries;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
    }

    fn event_types(&self) -> Vec<String> {
        if self.events.is_empty() {
            vec![WILDCARD_EVENT_TYPE.to_string()]
        } else {
            self.events.clone()
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    let value = value.trim();
    let _ = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| format!("invalid header name `{name}`: {e}"))?;
    let _ = HeaderValue::from_str(value)
        .map_err(|e| format!("invalid value for header `{name}`: {e}"))?;
    Ok((name.to_string(), value.to_string()))
}

/// Exit status for a finished run: failure if the stream errored out or
/// reconnection gave up.
fn outcome(state: ConnectionState, gave_up: bool) -> Result<()> {
    if gave_up {
        bail!("event stream failed: retries exhausted");
    }
    if state == ConnectionState::Error {
        bail!("event stream failed");
    }
    Ok(())
}

fn print_event(event: &StreamEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, event_type = %event.event_type, "failed to serialize event"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match cli.settings {
        Some(ref path) => eventline_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => eventline_settings::load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    init_subscriber(&settings.logging.level);

    let connector = StreamConnector::new(ConnectorConfig::from_settings(
        &cli.url,
        &settings.connector,
    ));
    for event_type in cli.event_types() {
        let _ = connector.on(event_type, print_event);
    }
    let gave_up = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&gave_up);
    let _ = connector.on_error(move |err| {
        warn!(error = %err, category = err.category(), "stream error");
        if matches!(err, StreamError::RetryExhausted { .. }) {
            flag.store(true, Ordering::SeqCst);
        }
    });

    info!(url = %cli.url, "tailing event stream");
    connector.connect();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("interrupted");
            connector.close();
        }
        () = connector.terminated() => {}
    }

    outcome(connector.state(), gave_up.load(Ordering::SeqCst))
}
