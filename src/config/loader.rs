use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};
use thiserror::Error;

use crate::config::models::{AppConfig, RuleSnapshot};

/// Error raised when a snapshot document cannot be decoded or encoded.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SnapshotError {
    /// The document is not a valid snapshot
    #[error("Malformed rule snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parse the textual snapshot format `{ "rules": {...}, "enabled": bool }`.
pub fn parse_snapshot(text: &str) -> Result<RuleSnapshot, SnapshotError> {
    Ok(serde_json::from_str(text)?)
}

/// Serialize a snapshot into its compact textual form.
pub fn snapshot_to_string(snapshot: &RuleSnapshot) -> Result<String, SnapshotError> {
    Ok(serde_json::to_string(snapshot)?)
}

/// Serialize a snapshot for humans (used when writing rule files).
pub fn snapshot_to_pretty_string(snapshot: &RuleSnapshot) -> Result<String, SnapshotError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// Load a snapshot document from disk.
pub async fn load_snapshot_file(path: impl AsRef<Path>) -> Result<RuleSnapshot> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read rules from {}", path.display()))?;
    parse_snapshot(&text).with_context(|| format!("Failed to parse rules in {}", path.display()))
}

/// Write a snapshot document to disk in pretty form.
pub async fn write_snapshot_file(path: impl AsRef<Path>, snapshot: &RuleSnapshot) -> Result<()> {
    let path = path.as_ref();
    let text = snapshot_to_pretty_string(snapshot)?;
    tokio::fs::write(path, text)
        .await
        .with_context(|| format!("Failed to write rules to {}", path.display()))
}

/// Load the application configuration.
///
/// The file format follows the extension (YAML, JSON, TOML, INI; TOML when
/// unknown). A missing file is fine, defaults apply. `MOCK_HELPER_*`
/// environment variables override file values, nested keys use `__`
/// (`MOCK_HELPER_LOGGING__LEVEL=debug`).
pub fn load_app_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    if let Some(config_path) = config_path {
        let path = Path::new(config_path);
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            Some("ini") => FileFormat::Ini,
            _ => FileFormat::Toml,
        };
        builder = builder.add_source(File::new(config_path, format).required(false));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix("MOCK_HELPER")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("Failed to build config from {config_path:?}"))?;

    let app_config: AppConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {config_path:?}"))?;

    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;
    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::models::{Rule, RuleTable};

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_snapshot("{not json").is_err());
        assert!(parse_snapshot("null").is_err());
        assert!(parse_snapshot(r#"{"rules": {"/a": 5}}"#).is_err());
    }

    #[test]
    fn test_round_trip_preserves_order_and_fields() {
        let mut rules = RuleTable::new();
        rules.insert("/z/*".to_string(), Rule::new(json!({"z": 1})).with_delay(50));
        rules.insert(
            "/a".to_string(),
            Rule::new("raw body")
                .with_status(418)
                .with_status_text("I'm a teapot")
                .with_content_type("text/plain")
                .with_header("X-Trace", "1"),
        );
        rules.insert("https://x.test/m".to_string(), Rule::default().disabled());
        rules.insert("/null".to_string(), Rule::new(serde_json::Value::Null));
        let snapshot = RuleSnapshot::new(rules, false);

        let text = snapshot_to_string(&snapshot).unwrap();
        let parsed = parse_snapshot(&text).unwrap();
        assert_eq!(parsed, snapshot);
        assert_eq!(parsed.rules["/null"].body_text(), "null");
        let keys: Vec<_> = parsed.rules.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["/z/*", "/a", "https://x.test/m", "/null"]);
    }

    #[test]
    fn test_duplicate_pattern_keeps_first_position_last_value() {
        let parsed =
            parse_snapshot(r#"{"rules": {"/a": {"status": 1}, "/b": {}, "/a": {"status": 2}}}"#)
                .unwrap();
        let keys: Vec<_> = parsed.rules.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["/a", "/b"]);
        assert_eq!(parsed.rules["/a"].status, Some(2));
    }

    #[tokio::test]
    async fn test_snapshot_file_round_trip() {
        let file = NamedTempFile::with_suffix(".json").unwrap();
        let mut rules = RuleTable::new();
        rules.insert("/api/login".to_string(), Rule::new(json!({"ok": true})).with_status(201));
        let snapshot = RuleSnapshot::new(rules, true);

        write_snapshot_file(file.path(), &snapshot).await.unwrap();
        let loaded = load_snapshot_file(file.path()).await.unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_load_toml_app_config() {
        let toml_content = r#"
listen_addr = "127.0.0.1:9100"
slot_dir = "/tmp/mock-slots"

[logging]
level = "debug"
json = true
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_app_config(temp_file.path().to_str()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9100");
        assert_eq!(config.slot_dir, "/tmp/mock-slots");
        assert_eq!(config.storage_key, "mock_helper_rules");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_missing_app_config_uses_defaults() {
        let config = load_app_config(Some("/nonexistent/mock-helper.toml")).unwrap();
        assert_eq!(config.store_path, "mock-rules.json");
    }
}
