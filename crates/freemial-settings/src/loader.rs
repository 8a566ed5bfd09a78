//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BrokerSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use freemial_logging::LogFormat;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::BrokerSettings;

/// Resolve the default settings file (`~/.freemial/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".freemial").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BrokerSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields the defaults. A file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BrokerSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Defaults merged with the settings file, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<BrokerSettings> {
    let defaults = serde_json::to_value(BrokerSettings::default())?;

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
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `FREEMIAL_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored, keeping the file/default value.
pub fn apply_env_overrides<F>(settings: &mut BrokerSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("FREEMIAL_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("FREEMIAL_PORT", |s| parse_range::<u16>(s, 1, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = env.parsed("FREEMIAL_SEND_QUEUE", |s| parse_range::<usize>(s, 1, 65_536)) {
        settings.hub.send_queue_capacity = v;
    }
    if let Some(v) = env.parsed("FREEMIAL_WRITE_WAIT_MS", |s| parse_range::<u64>(s, 100, 600_000)) {
        settings.transport.write_wait_ms = v;
    }
    if let Some(v) = env.parsed("FREEMIAL_PONG_WAIT_MS", |s| parse_range::<u64>(s, 100, 3_600_000)) {
        settings.transport.pong_wait_ms = v;
    }
    if let Some(v) = env.parsed("FREEMIAL_PING_PERIOD_MS", |s| parse_range::<u64>(s, 100, 3_600_000)) {
        settings.transport.ping_period_ms = v;
    }
    if let Some(v) = env.parsed("FREEMIAL_MAX_MESSAGE_SIZE", |s| {
        parse_range::<usize>(s, 64, 64 * 1024 * 1024)
    }) {
        settings.transport.max_message_size = v;
    }
    if let Some(v) = env.string("FREEMIAL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("FREEMIAL_LOG_FORMAT", LogFormat::parse) {
        settings.logging.format = v;
    }
}

/// Parse an integer and check it lies in `min..=max`.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_objects() {
        let a = serde_json::json!({"server": {"host": "0.0.0.0", "port": 8080}});
        let b = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(a, b);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
        assert_eq!(merged["server"]["port"], 9090);
    }

    #[test]
    fn merge_skips_null() {
        let a = serde_json::json!({"x": 1});
        let b = serde_json::json!({"x": null, "y": 2});
        let merged = deep_merge(a, b);
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }

    #[test]
    fn merge_replaces_primitives_and_arrays() {
        let merged = deep_merge(serde_json::json!([1, 2]), serde_json::json!([3]));
        assert_eq!(merged, serde_json::json!([3]));
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!(5));
        assert_eq!(merged, serde_json::json!(5));
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.hub.send_queue_capacity, 256);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090}, "transport": {"pongWaitMs": 30000}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.transport.pong_wait_ms, 30_000);
        assert_eq!(settings.transport.write_wait_ms, 10_000);
    }

    #[test]
    fn load_empty_json_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{}").unwrap();
        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        let result = load_file_layer(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_wrong_type_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "eighty"}}"#).unwrap();
        assert!(load_file_layer(&path).is_err());
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9090, "host": "10.0.0.1"}}"#).unwrap();

        let mut settings = load_file_layer(&path).unwrap();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("FREEMIAL_PORT", "7000"),
                ("FREEMIAL_SEND_QUEUE", "16"),
                ("FREEMIAL_LOG_FORMAT", "json"),
                ("FREEMIAL_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.server.host, "10.0.0.1");
        assert_eq!(settings.hub.send_queue_capacity, 16);
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = BrokerSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("FREEMIAL_PORT", "0"),
                ("FREEMIAL_SEND_QUEUE", "lots"),
                ("FREEMIAL_LOG_FORMAT", "xml"),
                ("FREEMIAL_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.hub.send_queue_capacity, 256);
        assert_eq!(settings.logging.format, LogFormat::Compact);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn transport_env_overrides() {
        let mut settings = BrokerSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("FREEMIAL_WRITE_WAIT_MS", "500"),
                ("FREEMIAL_PONG_WAIT_MS", "2000"),
                ("FREEMIAL_PING_PERIOD_MS", "1000"),
                ("FREEMIAL_MAX_MESSAGE_SIZE", "8192"),
            ]),
        );
        assert_eq!(settings.transport.write_wait_ms, 500);
        assert_eq!(settings.transport.pong_wait_ms, 2000);
        assert_eq!(settings.transport.ping_period_ms, 1000);
        assert_eq!(settings.transport.max_message_size, 8192);
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_range::<u16>("8080", 1, u16::MAX), Some(8080));
        assert_eq!(parse_range::<u16>(" 42 ", 1, 100), Some(42));
        assert_eq!(parse_range::<u16>("0", 1, 100), None);
        assert_eq!(parse_range::<u16>("70000", 1, u16::MAX), None);
        assert_eq!(parse_range::<u64>("abc", 0, 10), None);
    }
}
