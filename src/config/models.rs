//! Data structures for mock rules, rule snapshots and the application config.
//!
//! The snapshot types map directly onto the JSON document shared between the
//! authoring side and page contexts. They are intentionally lenient on input
//! (unknown fields are ignored, optional fields fall back to defaults) and keep
//! the insertion order of rules, which is also their resolution order.
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Default status code for a synthetic response.
pub const DEFAULT_STATUS: u16 = 200;
/// Default status text for a synthetic response.
pub const DEFAULT_STATUS_TEXT: &str = "OK";
/// Default `Content-Type` for a synthetic response.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
/// Shared-slot key the rule snapshot is stored under.
pub const DEFAULT_STORAGE_KEY: &str = "mock_helper_rules";

/// Insertion-ordered mapping from pattern to rule.
pub type RuleTable = IndexMap<String, Rule>;

/// One mock definition. The pattern is the key of the owning [`RuleTable`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Anything other than an explicit `false` counts as enabled
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::flag"
    )]
    pub enabled: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::status"
    )]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    /// A string body is used verbatim, anything else (`null` included) is
    /// serialized as JSON
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::present"
    )]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "IndexMap::is_empty",
        deserialize_with = "lenient::headers"
    )]
    pub headers: IndexMap<String, String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::millis"
    )]
    pub delay: Option<u64>,
}

impl Rule {
    /// Create an enabled rule answering with the given body.
    pub fn new(response: impl Into<Value>) -> Self {
        Self {
            enabled: Some(true),
            response: Some(response.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Some(delay_ms);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = Some(false);
        self
    }

    /// Whether the rule takes part in resolution.
    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }

    /// Effective status code; absent or zero falls back to 200.
    pub fn effective_status(&self) -> u16 {
        self.status.filter(|s| *s != 0).unwrap_or(DEFAULT_STATUS)
    }

    /// Effective status text; absent or empty falls back to "OK".
    pub fn effective_status_text(&self) -> &str {
        self.status_text
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_STATUS_TEXT)
    }

    /// Effective content type; absent or empty falls back to JSON.
    pub fn effective_content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// Delay in milliseconds before the synthetic response is delivered.
    pub fn effective_delay(&self) -> u64 {
        self.delay.unwrap_or(0)
    }

    /// Textual body: strings verbatim, other values in compact JSON form.
    pub fn body_text(&self) -> String {
        match &self.response {
            None => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// The full rule table plus the global enabled flag at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    #[serde(default, deserialize_with = "lenient::table")]
    pub rules: RuleTable,
    #[serde(default = "default_enabled", deserialize_with = "lenient::not_false")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for RuleSnapshot {
    fn default() -> Self {
        Self {
            rules: RuleTable::new(),
            enabled: true,
        }
    }
}

impl RuleSnapshot {
    pub fn new(rules: RuleTable, enabled: bool) -> Self {
        Self { rules, enabled }
    }
}

/// Deserializers that accept the loosely typed values hand-written snapshots contain.
mod lenient {
    use super::*;

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(Some(!matches!(value, Value::Bool(false))))
    }

    pub fn not_false<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(!matches!(value, Value::Bool(false)))
    }

    pub fn table<'de, D: Deserializer<'de>>(d: D) -> Result<RuleTable, D::Error> {
        Ok(Option::<RuleTable>::deserialize(d)?.unwrap_or_default())
    }

    fn number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Any value that is present, `null` included.
    pub fn present<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
        Value::deserialize(d).map(Some)
    }

    pub fn millis<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        let value = Value::deserialize(d)?;
        if value.is_null() {
            return Ok(None);
        }
        match number(&value).filter(|n| n.is_finite()) {
            // negative delays behave like an immediate delivery
            Some(n) => Ok(Some(n.max(0.0).trunc() as u64)),
            None => {
                tracing::warn!(%value, "ignoring invalid rule delay");
                Ok(None)
            }
        }
    }

    pub fn status<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u16>, D::Error> {
        let value = Value::deserialize(d)?;
        if value.is_null() {
            return Ok(None);
        }
        match number(&value).filter(|n| n.is_finite() && *n >= 0.0 && *n <= f64::from(u16::MAX)) {
            Some(n) => Ok(Some(n.trunc() as u16)),
            None => {
                tracing::warn!(%value, "ignoring invalid rule status");
                Ok(None)
            }
        }
    }

    pub fn headers<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<IndexMap<String, String>, D::Error> {
        let raw = Option::<IndexMap<String, Value>>::deserialize(d)?.unwrap_or_default();
        Ok(raw
            .into_iter()
            .filter_map(|(name, value)| match value {
                Value::String(s) => Some((name, s)),
                Value::Number(n) => Some((name, n.to_string())),
                Value::Bool(b) => Some((name, b.to_string())),
                other => {
                    tracing::warn!(header = %name, value = %other, "ignoring non-scalar header value");
                    None
                }
            })
            .collect())
    }
}

/// Logging options for the binary.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. "info" or "mock_helper=debug"
    pub level: String,
    /// Emit JSON lines instead of pretty console output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Application configuration for the `mock-helper` binary.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Address the authoring control API binds to
    pub listen_addr: String,
    /// File the authoring store persists rules and the enabled flag in
    pub store_path: String,
    /// Directory backing the shared snapshot slot
    pub slot_dir: String,
    /// Slot key the snapshot is published under
    pub storage_key: String,
    /// Base URL relative request URLs are resolved against on pass-through
    pub upstream_base: Option<String>,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7878".to_string(),
            store_path: "mock-rules.json".to_string(),
            slot_dir: ".mock-helper".to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            upstream_base: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Create a new application configuration builder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }
}

/// Builder for [`AppConfig`].
#[derive(Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn store_path(mut self, path: impl Into<String>) -> Self {
        self.config.store_path = path.into();
        self
    }

    pub fn slot_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.slot_dir = dir.into();
        self
    }

    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.config.storage_key = key.into();
        self
    }

    pub fn upstream_base(mut self, base: impl Into<String>) -> Self {
        self.config.upstream_base = Some(base.into());
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Build the final AppConfig
    pub fn build(self) -> Result<AppConfig, String> {
        if self.config.storage_key.is_empty() {
            return Err("storage_key must not be empty".to_string());
        }
        Ok(self.config)
    }
}
