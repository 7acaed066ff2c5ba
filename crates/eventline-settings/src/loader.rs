//! Reading `settings.json`, layering it over defaults and applying `EVENTLINE_*` overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`EventlineSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `EVENTLINE_*` environment overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::EventlineSettings;

/// Resolve the default settings path (`~/.eventline/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".eventline").join("settings.json")
}

/// Load `~/.eventline/settings.json` (or defaults) plus environment overrides.
pub fn load_settings() -> Result<EventlineSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` plus environment overrides.
///
/// A missing file yields defaults; invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<EventlineSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<EventlineSettings> {
    let defaults = serde_json::to_value(EventlineSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Layer `source` over `target`.
///
/// - Objects merge key by key, recursively
/// - Any other `source` value replaces the target value
/// - `null` in `source` leaves the target value in place
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `EVENTLINE_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut EventlineSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and leave the file/default value
/// in place.
pub fn apply_overrides_from<F>(settings: &mut EventlineSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let reconnect = &mut settings.connector.reconnect;
    if let Some(v) = read_u64(&lookup, "EVENTLINE_INITIAL_DELAY_MS", 0, 3_600_000) {
        reconnect.initial_delay_ms = v;
    }
    if let Some(v) = read_u64(&lookup, "EVENTLINE_MAX_DELAY_MS", 0, 3_600_000) {
        reconnect.max_delay_ms = v;
    }
    if let Some(v) = read_u64(&lookup, "EVENTLINE_MAX_RETRIES", 0, u64::from(u32::MAX)) {
        reconnect.max_retries = u32::try_from(v).unwrap_or(u32::MAX);
    }
    if let Some(v) = read_parsed(&lookup, "EVENTLINE_JITTER_FACTOR", parse_unit_f64) {
        reconnect.jitter_factor = v;
    }
    if let Some(v) = read_parsed(&lookup, "EVENTLINE_AUTO_RECONNECT", parse_bool) {
        settings.connector.auto_reconnect = v;
    }
    if let Some(v) = read_u64(&lookup, "EVENTLINE_DEDUP_WINDOW_MS", 1, 86_400_000) {
        settings.connector.dedup_window_ms = v;
    }
    if let Some(v) = read_parsed(&lookup, "EVENTLINE_MAX_BUFFER_SIZE", |s| {
        parse_usize_range(s, 1, 1_000_000)
    }) {
        settings.connector.max_buffer_size = v;
    }
    if let Some(v) = lookup("EVENTLINE_LOG_LEVEL").filter(|v| !v.is_empty()) {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a boolean env value.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u64` env value, rejecting anything outside `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a `usize` env value, rejecting anything outside `min..=max`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as an `f64` within `0.0..=1.0`.
pub fn parse_unit_f64(val: &str) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (0.0..=1.0).contains(&n).then_some(n)
}

fn read_parsed<F, T, P>(lookup: &F, name: &str, parse: P) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let val = lookup(name)?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

fn read_u64<F>(lookup: &F, name: &str, min: u64, max: u64) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    read_parsed(lookup, name, |s| parse_u64_range(s, min, max))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
