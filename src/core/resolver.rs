//! First-match-wins rule resolution.
//!
//! Rules are tried in table insertion order and the first enabled rule whose
//! pattern matches wins. There is no specificity ranking: a broad
//! wildcard placed before a literal pattern shadows it.
use std::sync::Arc;

use crate::{
    config::models::{Rule, RuleSnapshot},
    core::matcher::CompiledPattern,
};

/// A rule paired with its compiled pattern.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub pattern: String,
    /// `None` when the pattern failed to compile; such rules never match
    pub matcher: Option<CompiledPattern>,
    pub rule: Arc<Rule>,
}

impl CompiledRule {
    pub fn matches(&self, url: &str) -> bool {
        self.matcher.as_ref().is_some_and(|m| m.matches(url))
    }
}

/// A rule that was selected for a request.
#[derive(Debug, Clone)]
pub struct ResolvedRule {
    pub pattern: String,
    pub rule: Arc<Rule>,
}

/// Compiled form of a [`RuleSnapshot`], in resolution order.
#[derive(Debug, Clone, Default)]
pub struct CompiledTable {
    enabled: bool,
    rules: Vec<CompiledRule>,
}

impl CompiledTable {
    /// Compile every pattern of the snapshot once.
    pub fn compile(snapshot: &RuleSnapshot) -> Self {
        let rules = snapshot
            .rules
            .iter()
            .map(|(pattern, rule)| {
                let matcher = match CompiledPattern::new(pattern) {
                    Ok(m) => Some(m),
                    Err(e) => {
                        tracing::warn!(error = %e, "rule will never match");
                        None
                    }
                };
                CompiledRule {
                    pattern: pattern.clone(),
                    matcher,
                    rule: Arc::new(rule.clone()),
                }
            })
            .collect();

        Self {
            enabled: snapshot.enabled,
            rules,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Return the first applicable rule for `url`, if any.
    pub fn resolve(&self, url: &str) -> Option<ResolvedRule> {
        if !self.enabled {
            return None;
        }

        let hit = self
            .rules
            .iter()
            .find(|candidate| candidate.rule.is_enabled() && candidate.matches(url))?;

        tracing::info!(pattern = %hit.pattern, url = %url, "mock rule hit");
        Some(ResolvedRule {
            pattern: hit.pattern.clone(),
            rule: hit.rule.clone(),
        })
    }
}

/// Resolve `url` against a snapshot without keeping the compiled table.
pub fn resolve(snapshot: &RuleSnapshot, url: &str) -> Option<ResolvedRule> {
    CompiledTable::compile(snapshot).resolve(url)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::models::RuleTable;

    fn table(entries: &[(&str, Rule)]) -> RuleSnapshot {
        let rules: RuleTable = entries
            .iter()
            .map(|(p, r)| (p.to_string(), r.clone()))
            .collect();
        RuleSnapshot::new(rules, true)
    }

    #[test]
    fn test_first_match_wins_over_specificity() {
        let snapshot = table(&[
            ("/api/*", Rule::new("broad")),
            ("/api/users", Rule::new("specific")),
        ]);
        let hit = resolve(&snapshot, "/api/users").unwrap();
        assert_eq!(hit.pattern, "/api/*");
        assert_eq!(hit.rule.body_text(), "broad");
    }

    #[test]
    fn test_disabled_rules_are_skipped() {
        let snapshot = table(&[
            ("/api/*", Rule::new("off").disabled()),
            ("/api/users", Rule::new("on")),
        ]);
        let hit = resolve(&snapshot, "https://x.test/api/users").unwrap();
        assert_eq!(hit.pattern, "/api/users");
    }

    #[test]
    fn test_global_flag_disables_everything() {
        let mut snapshot = table(&[("*", Rule::new(json!({})))]);
        snapshot.enabled = false;
        let compiled = CompiledTable::compile(&snapshot);
        for url in ["/a", "https://x.test/b", ""] {
            assert!(compiled.resolve(url).is_none());
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let snapshot = table(&[
            ("/a/*", Rule::new(1)),
            ("/a/b", Rule::new(2)),
            ("*", Rule::new(3)),
        ]);
        let compiled = CompiledTable::compile(&snapshot);
        let first = compiled.resolve("/a/b").unwrap().pattern;
        for _ in 0..100 {
            assert_eq!(compiled.resolve("/a/b").unwrap().pattern, first);
        }
        assert_eq!(compiled.resolve("/zzz").unwrap().pattern, "*");
    }

    #[test]
    fn test_miss() {
        let snapshot = table(&[("/api/login", Rule::new(json!({"ok": true})))]);
        assert!(resolve(&snapshot, "/api/logout").is_none());
        assert!(resolve(&snapshot, "https://x.test/api/login?x=1").is_none());
    }
}
