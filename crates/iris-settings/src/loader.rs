//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`IrisSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `IRIS_*` environment variable overrides
//!
//! Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::IrisSettings;

/// `~/.iris`, or `/tmp/.iris` when `HOME` is unset.
pub fn iris_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".iris")
}

/// Resolve the path to the settings file (`~/.iris/settings.json`).
pub fn settings_path() -> PathBuf {
    iris_home().join("settings.json")
}

/// Resolve a path from the settings relative to `~/.iris`.
pub fn resolve_path(path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        iris_home().join(path)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<IrisSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<IrisSettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file(path: &Path) -> Result<IrisSettings> {
    let defaults = serde_json::to_value(IrisSettings::default())?;

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

/// Apply `IRIS_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut IrisSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from any variable source. Invalid values are logged and
/// ignored, keeping the file/default value.
pub fn apply_overrides(settings: &mut IrisSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("IRIS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("IRIS_PORT", 1, 65535) {
        settings.server.port = v;
    }

    // ── Multipart ───────────────────────────────────────────────────
    if let Some(v) = env.usize("IRIS_MAX_FRAME_SIZE", 64, 64 * 1024 * 1024) {
        settings.multipart.max_frame_size = v;
    }
    if let Some(v) = env.u64("IRIS_FRAGMENT_TTL_SECS", 0, 86_400) {
        settings.multipart.fragment_ttl_secs = v;
    }

    // ── API ─────────────────────────────────────────────────────────
    if let Some(v) = env.string("IRIS_API_URL") {
        settings.api.url = Some(v);
    }
    if let Some(v) = env.u64("IRIS_API_TIMEOUT_SECS", 1, 600) {
        settings.api.timeout_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("IRIS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("IRIS_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = env.bool("IRIS_LOG_FRAMES") {
        settings.logging.log_frames = v;
    }
    if let Some(v) = env.bool("IRIS_LOG_TO_SQLITE") {
        settings.logging.log_to_sqlite = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as an unsigned integer within an inclusive range.
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

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.ranged(name, min, max)
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.ranged(name, min, max)
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.ranged(name, min, max)
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd,
    {
        let val = (self.lookup)(name)?;
        let result = parse_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8045, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_file ───────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 8045);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9001}, "multipart": {"fragmentTtlSecs": 60}}"#,
        )
        .unwrap();

        let settings = load_file(&path).unwrap();
        assert_eq!(settings.server.port, 9001);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.multipart.fragment_ttl_secs, 60);
        assert_eq!(settings.multipart.max_frame_size, 65_536);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(load_file(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn invalid_value_from_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"multipart": {"maxPacketCount": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9001}, "api": {"url": "https://file"}}"#)
            .unwrap();

        let mut settings = load_file(&path).unwrap();
        apply_overrides(
            &mut settings,
            vars(&[
                ("IRIS_PORT", "9500"),
                ("IRIS_API_URL", "https://env"),
                ("IRIS_LOG_JSON", "yes"),
                ("IRIS_FRAGMENT_TTL_SECS", "0"),
            ]),
        );
        assert_eq!(settings.server.port, 9500);
        assert_eq!(settings.api.url.as_deref(), Some("https://env"));
        assert!(settings.logging.json);
        assert_eq!(settings.multipart.fragment_ttl_secs, 0);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = IrisSettings::default();
        apply_overrides(
            &mut settings,
            vars(&[
                ("IRIS_PORT", "0"),
                ("IRIS_LOG_FRAMES", "maybe"),
                ("IRIS_HOST", ""),
                ("IRIS_API_TIMEOUT_SECS", "abc"),
            ]),
        );
        assert_eq!(settings.server.port, 8045);
        assert!(!settings.logging.log_frames);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.api.timeout_secs, 10);
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "no", "off", "NO"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_range::<u16>("9090", 1, 65535), Some(9090));
        assert_eq!(parse_range::<u16>("0", 1, 65535), None);
        assert_eq!(parse_range::<u16>("99999", 1, 65535), None);
        assert_eq!(parse_range::<u64>("-1", 0, 10), None);
    }

    #[test]
    fn relative_paths_resolve_under_home() {
        assert!(resolve_path("logs.db").ends_with(".iris/logs.db"));
        assert_eq!(resolve_path("/var/log/iris.db"), PathBuf::from("/var/log/iris.db"));
    }
}
