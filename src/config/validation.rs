use std::net::SocketAddr;

use http::{HeaderName, HeaderValue};

use crate::{
    config::models::{AppConfig, Rule, RuleSnapshot},
    core::matcher::CompiledPattern,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// A rule that can never be selected for its own pattern because an earlier
/// rule already matches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowedRule {
    pub pattern: String,
    pub shadowed_by: String,
}

/// Rule snapshot validator
pub struct SnapshotValidator;

impl SnapshotValidator {
    /// Validate every rule of a snapshot.
    ///
    /// Validation is advisory: the interceptor tolerates every problem reported
    /// here (bad headers are skipped, uncompilable patterns never match).
    pub fn validate(snapshot: &RuleSnapshot) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for (pattern, rule) in &snapshot.rules {
            if let Err(mut rule_errors) = Self::validate_rule(pattern, rule) {
                errors.append(&mut rule_errors);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: format_multiple_errors(errors),
            })
        }
    }

    fn validate_rule(pattern: &str, rule: &Rule) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if pattern.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "rule pattern".to_string(),
            });
        } else if let Err(e) = CompiledPattern::new(pattern) {
            errors.push(ValidationError::InvalidField {
                field: format!("rule '{pattern}' pattern"),
                message: e.to_string(),
            });
        }

        if let Some(status) = rule.status {
            if status != 0 && !(100..=999).contains(&status) {
                errors.push(ValidationError::InvalidField {
                    field: format!("rule '{pattern}' status"),
                    message: format!("Status {status} is outside 100-999"),
                });
            }
        }

        if let Some(content_type) = &rule.content_type {
            if HeaderValue::from_str(content_type).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: format!("rule '{pattern}' contentType"),
                    message: format!("'{content_type}' is not a valid header value"),
                });
            }
        }

        for (name, value) in &rule.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: format!("rule '{pattern}' headers"),
                    message: format!("'{name}' is not a valid header name"),
                });
            } else if HeaderValue::from_str(value).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: format!("rule '{pattern}' headers.{name}"),
                    message: "Not a valid header value".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Report enabled rules hidden behind an earlier enabled rule.
    ///
    /// Resolution is first-match-wins, so `/api/*` placed before `/api/users`
    /// makes the latter unreachable. A rule is reported only when the earlier
    /// one matches every URL it does. This only reports; it does not reorder.
    pub fn shadowed_rules(snapshot: &RuleSnapshot) -> Vec<ShadowedRule> {
        let active: Vec<(&String, Option<CompiledPattern>)> = snapshot
            .rules
            .iter()
            .filter(|(_, rule)| rule.is_enabled())
            .map(|(pattern, _)| (pattern, CompiledPattern::new(pattern).ok()))
            .collect();

        let mut shadowed = Vec::new();
        for (i, (pattern, compiled)) in active.iter().enumerate() {
            let Some(later) = compiled else {
                continue;
            };
            if let Some((earlier, _)) = active[..i]
                .iter()
                .find(|(_, m)| m.as_ref().is_some_and(|m| m.covers(later)))
            {
                shadowed.push(ShadowedRule {
                    pattern: (*pattern).clone(),
                    shadowed_by: (*earlier).clone(),
                });
            }
        }
        shadowed
    }
}

/// Application configuration validator
pub struct AppConfigValidator;

impl AppConfigValidator {
    pub fn validate(config: &AppConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.listen_addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidListenAddress {
                address: config.listen_addr.clone(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:7878')".to_string(),
            });
        }

        for (field, value) in [
            ("store_path", &config.store_path),
            ("slot_dir", &config.slot_dir),
            ("storage_key", &config.storage_key),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: field.to_string(),
                });
            }
        }

        if let Some(base) = &config.upstream_base {
            match url::Url::parse(base) {
                Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
                Ok(url) => errors.push(ValidationError::InvalidField {
                    field: "upstream_base".to_string(),
                    message: format!(
                        "URL scheme must be 'http' or 'https', got '{}'",
                        url.scheme()
                    ),
                }),
                Err(e) => errors.push(ValidationError::InvalidField {
                    field: "upstream_base".to_string(),
                    message: format!("Invalid URL format: {e}"),
                }),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: format_multiple_errors(errors),
            })
        }
    }
}

fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
    if errors.len() == 1 {
        return errors[0].to_string();
    }

    let mut message = format!("Found {} validation errors:\n", errors.len());
    for (i, error) in errors.iter().enumerate() {
        message.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    message
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::models::RuleTable;

    fn snapshot(entries: Vec<(&str, Rule)>) -> RuleSnapshot {
        let rules: RuleTable = entries
            .into_iter()
            .map(|(p, r)| (p.to_string(), r))
            .collect();
        RuleSnapshot::new(rules, true)
    }

    #[test]
    fn validate_accepts_typical_rules() {
        let s = snapshot(vec![
            ("/api/login", Rule::new(json!({"ok": true})).with_status(201)),
            ("/api/*", Rule::new("fallback").with_header("Cache-Control", "no-store")),
        ]);
        assert!(SnapshotValidator::validate(&s).is_ok());
    }

    #[test]
    fn validate_collects_all_rule_errors() {
        let s = snapshot(vec![
            (" ", Rule::default()),
            ("/a", Rule::default().with_status(42)),
            ("/b", Rule::default().with_header("bad name", "x")),
            ("/c", Rule::default().with_content_type("text/plain\n")),
        ]);
        let err = SnapshotValidator::validate(&s).unwrap_err().to_string();
        assert!(err.contains("Found 4 validation errors"), "{err}");
        assert!(err.contains("rule '/a' status"));
        assert!(err.contains("'bad name'"));
    }

    #[test]
    fn zero_status_means_default() {
        let s = snapshot(vec![("/a", Rule::default().with_status(0))]);
        assert!(SnapshotValidator::validate(&s).is_ok());
    }

    #[test]
    fn shadowed_rules_are_reported() {
        let s = snapshot(vec![
            ("/api/*", Rule::default()),
            ("/api/users", Rule::default()),
            ("/other", Rule::default()),
            ("/api/v2/*", Rule::default()),
        ]);
        let shadowed = SnapshotValidator::shadowed_rules(&s);
        assert_eq!(
            shadowed,
            vec![
                ShadowedRule {
                    pattern: "/api/users".to_string(),
                    shadowed_by: "/api/*".to_string()
                },
                ShadowedRule {
                    pattern: "/api/v2/*".to_string(),
                    shadowed_by: "/api/*".to_string()
                },
            ]
        );
    }

    #[test]
    fn partial_overlap_is_not_shadowing() {
        let s = snapshot(vec![
            ("/api/", Rule::default()),
            ("/api/*", Rule::default()),
            ("/api/*/items", Rule::default()),
            ("*", Rule::default()),
            ("/late", Rule::default()),
        ]);
        assert_eq!(
            SnapshotValidator::shadowed_rules(&s),
            vec![
                ShadowedRule {
                    pattern: "/api/*/items".to_string(),
                    shadowed_by: "/api/*".to_string()
                },
                ShadowedRule {
                    pattern: "/late".to_string(),
                    shadowed_by: "*".to_string()
                },
            ]
        );
        let hit = crate::core::resolve(&s, "/api/users").unwrap();
        assert_eq!(hit.pattern, "/api/*");
    }

    #[test]
    fn disabled_rules_do_not_shadow() {
        let s = snapshot(vec![
            ("/api/*", Rule::default().disabled()),
            ("/api/users", Rule::default()),
        ]);
        assert!(SnapshotValidator::shadowed_rules(&s).is_empty());
    }

    #[test]
    fn app_config_validation() {
        assert!(AppConfigValidator::validate(&AppConfig::default()).is_ok());

        let mut config = AppConfig::default();
        config.listen_addr = "localhost".to_string();
        config.upstream_base = Some("ftp://x".to_string());
        config.slot_dir = String::new();
        let err = AppConfigValidator::validate(&config).unwrap_err().to_string();
        assert!(err.contains("Found 3 validation errors"), "{err}");
    }
}
