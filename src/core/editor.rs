//! Authoring-side edits of a rule table.
//!
//! Drafts carry the raw text a user typed into an editor form; applying one
//! normalises it into a [`Rule`] and places it in the table. Editing a rule in
//! place keeps its position (and therefore its priority); renaming the pattern
//! moves the rule to the end of the table.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::models::{DEFAULT_STATUS, Rule, RuleTable};

/// Errors raised while applying an edit.
#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DraftError {
    #[error("A URL pattern is required")]
    EmptyPattern,
    #[error("No rule with pattern '{0}'")]
    UnknownPattern(String),
}

/// Raw editor form contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDraft {
    pub pattern: String,
    pub status: String,
    pub delay: String,
    pub response: String,
}

impl RuleDraft {
    /// The form as it is prefilled for a new rule.
    pub fn blank(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            status: DEFAULT_STATUS.to_string(),
            delay: "0".to_string(),
            response: "{\n  \"code\": 0,\n  \"message\": \"success\",\n  \"data\": {}\n}"
                .to_string(),
        }
    }

    /// The form as it is prefilled when editing an existing rule.
    pub fn from_rule(pattern: &str, rule: &Rule) -> Self {
        let response = match &rule.response {
            None => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        Self {
            pattern: pattern.to_string(),
            status: rule.effective_status().to_string(),
            delay: rule.effective_delay().to_string(),
            response,
        }
    }

    /// Normalise the draft into a pattern and an enabled rule.
    pub fn into_rule(self) -> Result<(String, Rule), DraftError> {
        let pattern = self.pattern.trim().to_string();
        if pattern.is_empty() {
            return Err(DraftError::EmptyPattern);
        }

        let status = leading_int(&self.status)
            .filter(|s| *s > 0)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(DEFAULT_STATUS);
        let delay = leading_int(&self.delay)
            .map(|d| d.max(0) as u64)
            .unwrap_or(0);
        // text that is not JSON is kept as a literal body
        let response = serde_json::from_str::<Value>(&self.response)
            .unwrap_or(Value::String(self.response));

        let rule = Rule {
            enabled: Some(true),
            status: Some(status),
            delay: Some(delay),
            response: Some(response),
            ..Rule::default()
        };
        Ok((pattern, rule))
    }
}

/// Integer prefix of `text` (after leading whitespace), like a lenient form parser.
fn leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

/// Apply a draft to `table`.
///
/// `editing` names the pattern the form was opened for, if any. When the
/// pattern changed the old entry is removed and the new one appended.
/// Returns the pattern the rule is stored under.
pub fn apply_draft(
    table: &mut RuleTable,
    editing: Option<&str>,
    draft: RuleDraft,
) -> Result<String, DraftError> {
    let (pattern, rule) = draft.into_rule()?;

    if let Some(previous) = editing
        && previous != pattern
    {
        table.shift_remove(previous);
    }
    table.insert(pattern.clone(), rule);
    Ok(pattern)
}

/// Remove a rule, keeping the order of the rest.
pub fn delete_rule(table: &mut RuleTable, pattern: &str) -> Result<Rule, DraftError> {
    table
        .shift_remove(pattern)
        .ok_or_else(|| DraftError::UnknownPattern(pattern.to_string()))
}

/// Flip a rule's own enabled flag; returns the new value.
pub fn toggle_rule(table: &mut RuleTable, pattern: &str) -> Result<bool, DraftError> {
    let rule = table
        .get_mut(pattern)
        .ok_or_else(|| DraftError::UnknownPattern(pattern.to_string()))?;
    let enabled = !rule.is_enabled();
    rule.enabled = Some(enabled);
    Ok(enabled)
}
