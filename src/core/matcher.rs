//! URL pattern matching.
//!
//! A pattern is either a literal URL (absolute, or path plus query) or a
//! string containing `*` wildcards, each of which matches any run of
//! characters including none. Every pattern is tested against both the raw
//! request URL and, for absolute `http(s)` URLs, its path+query form, so
//! `/api/users` matches `https://host.test/api/users` as well.
//!
//! Matching never fails loudly: a pattern that cannot be compiled matches
//! nothing, so a broken rule only ever falls through to the real transport.
use regex::Regex;
use thiserror::Error;
use url::Url;

/// Error raised when a pattern cannot be turned into a matcher.
#[derive(Error, Debug)]
#[error("Invalid pattern '{pattern}': {source}")]
pub struct PatternError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// A URL pattern compiled into an anchored expression.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pattern: String,
    regex: Regex,
}

impl CompiledPattern {
    /// Compile `pattern`, escaping everything except `*`.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{body}$")).map_err(|source| PatternError {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The source pattern.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern contains a wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.pattern.contains('*')
    }

    /// Test a request URL against the pattern.
    pub fn matches(&self, url: &str) -> bool {
        let path = path_and_query(url);
        let path = path.as_deref();

        if self.pattern == url || Some(self.pattern.as_str()) == path {
            return true;
        }

        self.regex.is_match(url) || path.is_some_and(|p| self.regex.is_match(p))
    }

    /// Whether every URL `other` matches is matched by this pattern as well.
    ///
    /// Each `*` of `other` is replaced by a character no literal part of this
    /// pattern contains, so only a wildcard here can absorb it. The answer is
    /// conservative: `true` is always correct, `false` may miss exotic overlaps.
    pub fn covers(&self, other: &CompiledPattern) -> bool {
        if !other.is_wildcard() {
            return self.matches(&other.pattern);
        }
        if self.pattern.contains(WILDCARD_STAND_IN) {
            return false;
        }
        let symbolic = other.pattern.replace('*', &WILDCARD_STAND_IN.to_string());
        self.regex.is_match(&symbolic)
    }
}

const WILDCARD_STAND_IN: char = '\u{0}';

/// Match `pattern` against `url`, compiling on the fly.
///
/// Prefer [`CompiledPattern`] when the same pattern is tested repeatedly.
pub fn matches(pattern: &str, url: &str) -> bool {
    match CompiledPattern::new(pattern) {
        Ok(compiled) => compiled.matches(url),
        Err(e) => {
            tracing::warn!(error = %e, "pattern cannot be compiled, treating as no match");
            false
        }
    }
}

/// Path plus query of an absolute `http(s)` URL.
///
/// Returns `None` for relative URLs and for absolute URLs that fail to parse;
/// those are only ever matched in raw form. The query is included only when it
/// is non-empty.
pub fn path_and_query(url: &str) -> Option<String> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return None;
    }
    let parsed = Url::parse(url).ok()?;
    let mut out = parsed.path().to_string();
    if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(query);
    }
    Some(out)
}

/// Where a prefilled pattern comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefillSource {
    /// Text the user selected on the page
    Selection(String),
    /// A link the user picked
    Link(String),
}

/// Suggest a rule pattern for a selection or a link.
///
/// Selections are used as typed (trimmed). Links collapse to their path and
/// query so the rule applies across hosts; links that do not parse are used
/// verbatim. Returns `None` when nothing usable remains.
pub fn suggest_pattern(source: &PrefillSource) -> Option<String> {
    let suggestion = match source {
        PrefillSource::Selection(text) => text.trim().to_string(),
        PrefillSource::Link(link) => match Url::parse(link) {
            Ok(parsed) => {
                let mut out = parsed.path().to_string();
                if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
                    out.push('?');
                    out.push_str(query);
                }
                out
            }
            Err(_) => link.clone(),
        },
    };
    (!suggestion.is_empty()).then_some(suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_raw_and_path() {
        assert!(matches("/api/users", "/api/users"));
        assert!(matches("/api/users", "https://x.test/api/users"));
        assert!(matches("https://x.test/api/users", "https://x.test/api/users"));
        assert!(matches("/api/login?x=1", "https://x.test/api/login?x=1"));
        assert!(!matches("/api/login", "https://x.test/api/login?x=1"));
        assert!(!matches("/api/users", "/api/users/1"));
    }

    #[test]
    fn test_wildcards() {
        assert!(matches("/api/*", "/api/users"));
        assert!(matches("/api/*", "/api/"));
        assert!(!matches("/api/*", "/other"));
        assert!(matches("*/users", "https://x.test/v2/users"));
        assert!(matches("/api/*/detail", "/api/42/detail"));
        assert!(matches("/api/login*", "https://x.test/api/login?x=1"));
        assert!(matches("*", "anything at all"));
    }

    #[test]
    fn test_wildcard_substitution_property() {
        let pattern = "/v*/items/*";
        for (a, b) in [("1", "abc"), ("", ""), ("2beta", "x/y/z"), ("9", "q=1&r")] {
            let concrete = format!("/v{a}/items/{b}");
            assert!(matches(pattern, &concrete), "{concrete}");
        }
    }

    #[test]
    fn test_covers() {
        let p = |s: &str| CompiledPattern::new(s).unwrap();
        assert!(p("/api/*").covers(&p("/api/users")));
        assert!(p("/api/*").covers(&p("/api/*/items")));
        assert!(p("*").covers(&p("/api/*")));
        assert!(p("/api/users").covers(&p("https://x.test/api/users")));
        assert!(!p("/api/").covers(&p("/api/*")));
        assert!(!p("/api/*/items").covers(&p("/api/*")));
        assert!(!p("/api/users").covers(&p("/api/*")));
    }

    #[test]
    fn test_metacharacters_are_literal() {
        assert!(matches("/a.b", "/a.b"));
        assert!(!matches("/a.b", "/aXb"));
        assert!(matches("/q?id=(1)", "/q?id=(1)"));
        assert!(!matches("/q?id=(1)", "/qid=1"));
        assert!(matches("/p+[x]{2}$^|\\", "/p+[x]{2}$^|\\"));
        assert!(!matches("/a+", "/aaa"));
    }

    #[test]
    fn test_literal_pattern_is_exact() {
        let p = CompiledPattern::new("/api/users").unwrap();
        assert!(!p.is_wildcard());
        assert!(p.matches("http://h.test/api/users"));
        assert!(!p.matches("http://h.test/api/users2"));
        assert!(!p.matches("/api/user"));
    }

    #[test]
    fn test_malformed_absolute_url_matches_raw_only() {
        assert!(path_and_query("http://[bad").is_none());
        assert!(matches("http://[bad", "http://[bad"));
        assert!(matches("http://*", "http://[bad"));
        assert!(!matches("/bad", "http://[bad"));
    }

    #[test]
    fn test_path_and_query() {
        assert_eq!(path_and_query("https://x.test").as_deref(), Some("/"));
        assert_eq!(path_and_query("https://x.test/a?").as_deref(), Some("/a"));
        assert_eq!(path_and_query("https://x.test/a?b=1#frag").as_deref(), Some("/a?b=1"));
        assert_eq!(path_and_query("/relative"), None);
        assert_eq!(path_and_query("ftp://x.test/a"), None);
    }

    #[test]
    fn test_suggest_pattern() {
        assert_eq!(
            suggest_pattern(&PrefillSource::Selection("  /api/list \n".into())).as_deref(),
            Some("/api/list")
        );
        assert_eq!(
            suggest_pattern(&PrefillSource::Link("https://x.test/p/q?r=1".into())).as_deref(),
            Some("/p/q?r=1")
        );
        assert_eq!(
            suggest_pattern(&PrefillSource::Link("not a url".into())).as_deref(),
            Some("not a url")
        );
        assert_eq!(suggest_pattern(&PrefillSource::Selection("   ".into())), None);
    }
}
