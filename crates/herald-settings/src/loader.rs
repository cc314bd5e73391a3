//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::HeraldSettings;

/// Resolve the path to the settings file (`~/.herald/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".herald").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HeraldSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HeraldSettings> {
    let mut settings = read_layered(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<HeraldSettings> {
    let defaults = serde_json::to_value(HeraldSettings::default())?;

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

/// Recursive deep merge of two JSON values.
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

/// Apply `HERALD_*` overrides read through `lookup`.
///
/// Numbers must parse and fall within range; booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Invalid values are
/// ignored with a warning.
pub fn apply_env_overrides<F>(settings: &mut HeraldSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Backend ─────────────────────────────────────────────────────
    if let Some(v) = env.string("HERALD_BACKEND_URL") {
        settings.backend.url = v;
    }
    if let Some(v) = env.raw("HERALD_API_PREFIX") {
        settings.backend.api_prefix = v;
    }
    if let Some(v) = env.u64("HERALD_REQUEST_TIMEOUT_MS", 100, 600_000) {
        settings.backend.request_timeout_ms = v;
    }

    // ── Transport ───────────────────────────────────────────────────
    if let Some(v) = env.u64("HERALD_RECONNECT_ATTEMPTS", 0, 1_000) {
        settings.transport.reconnection_attempts = v as u32;
    }
    if let Some(v) = env.u64("HERALD_RECONNECT_DELAY_MS", 10, 600_000) {
        settings.transport.reconnection_delay_ms = v;
    }
    if let Some(v) = env.u64("HERALD_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.transport.connect_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("HERALD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("HERALD_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    /// Value as set, including the empty string.
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.raw(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.raw(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }
}
