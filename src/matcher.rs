//! Ignore-path matching
//!
//! Compiles the configured skip patterns into a single predicate evaluated
//! against the request path at finalize time. Supports exact strings,
//! `prefix*` / `*suffix` wildcards, regular expressions, and an arbitrary
//! caller-supplied predicate as a full replacement for the whole matcher.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{Error, Result};

/// A single compiled ignore-path pattern
#[derive(Debug, Clone)]
pub enum IgnorePath {
    /// Full-string equality
    Exact(String),
    /// `prefix*`: matches any path starting with the remainder
    Prefix(String),
    /// `*suffix`: matches any path ending with the remainder
    Suffix(String),
    /// Partial-match regular expression
    Regex(Regex),
}

impl IgnorePath {
    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(p) => path == p,
            Self::Prefix(p) => path.starts_with(p),
            Self::Suffix(s) => path.ends_with(s),
            Self::Regex(re) => re.is_match(path),
        }
    }
}

#[derive(Clone)]
enum MatcherKind {
    Patterns(Vec<IgnorePath>),
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

/// Immutable compiled skip predicate over request paths
///
/// Built once at pipeline construction (or config reload) and shared
/// read-only across concurrent exchanges. Matching is a disjunction over all
/// patterns; order is irrelevant. Zero patterns means the predicate is
/// always false.
#[derive(Clone)]
pub struct PathMatcher {
    kind: MatcherKind,
}

impl PathMatcher {
    /// Build a matcher from pre-compiled patterns
    pub fn new(patterns: Vec<IgnorePath>) -> Self {
        Self {
            kind: MatcherKind::Patterns(patterns),
        }
    }

    /// Matcher that never matches (no skip-by-path configured)
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// Escape hatch: replace the whole matcher with an arbitrary predicate
    pub fn from_fn(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            kind: MatcherKind::Custom(Arc::new(f)),
        }
    }

    /// Compile configuration strings into a matcher.
    ///
    /// A leading `re:` compiles the remainder as a regular expression, a
    /// trailing `*` makes a prefix pattern, a leading `*` a suffix pattern,
    /// anything else is matched exactly. An invalid regex is a fatal
    /// [`Error::Config`], raised here rather than at request time.
    pub fn compile(specs: &[String]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(specs.len());
        for spec in specs {
            patterns.push(Self::compile_one(spec)?);
        }
        Ok(Self::new(patterns))
    }

    fn compile_one(spec: &str) -> Result<IgnorePath> {
        if let Some(raw) = spec.strip_prefix("re:") {
            let re = Regex::new(raw).map_err(|e| {
                Error::config(format!("invalid ignore_paths regex {raw:?}: {e}"))
            })?;
            return Ok(IgnorePath::Regex(re));
        }
        if let Some(prefix) = spec.strip_suffix('*') {
            if prefix.starts_with('*') {
                return Err(Error::config(format!(
                    "unsupported ignore_paths pattern {spec:?}: at most one wildcard, at an end"
                )));
            }
            return Ok(IgnorePath::Prefix(prefix.to_string()));
        }
        if let Some(suffix) = spec.strip_prefix('*') {
            return Ok(IgnorePath::Suffix(suffix.to_string()));
        }
        if spec.contains('*') {
            return Err(Error::config(format!(
                "unsupported ignore_paths pattern {spec:?}: interior wildcards are not supported"
            )));
        }
        Ok(IgnorePath::Exact(spec.to_string()))
    }

    /// True if any pattern matches the path
    pub fn matches(&self, path: &str) -> bool {
        match &self.kind {
            MatcherKind::Patterns(patterns) => patterns.iter().any(|p| p.matches(path)),
            MatcherKind::Custom(f) => f(path),
        }
    }

    /// True if no pattern and no custom predicate is configured
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            MatcherKind::Patterns(patterns) => patterns.is_empty(),
            MatcherKind::Custom(_) => false,
        }
    }
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MatcherKind::Patterns(patterns) => {
                f.debug_tuple("PathMatcher").field(patterns).finish()
            }
            MatcherKind::Custom(_) => f.debug_tuple("PathMatcher").field(&"<custom>").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(specs: &[&str]) -> PathMatcher {
        let specs: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
        PathMatcher::compile(&specs).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let m = compile(&["/a"]);
        assert!(m.matches("/a"));
        assert!(!m.matches("/a/"));
        assert!(!m.matches("/ab"));
        assert!(!m.matches("a"));
    }

    #[test]
    fn test_prefix_wildcard() {
        let m = compile(&["/a*"]);
        assert!(m.matches("/a"));
        assert!(m.matches("/abc"));
        assert!(!m.matches("/xa"));
    }

    #[test]
    fn test_suffix_wildcard() {
        let m = compile(&["*a"]);
        assert!(m.matches("/xa"));
        assert!(m.matches("a"));
        assert!(!m.matches("/ax"));
    }

    #[test]
    fn test_regex_pattern() {
        let m = compile(&["re:^/api/"]);
        assert!(m.matches("/api/x"));
        assert!(!m.matches("/v2/api"));
    }

    #[test]
    fn test_regex_partial_match_semantics() {
        let m = compile(&["re:/fun"]);
        assert!(m.matches("/func"));
        assert!(m.matches("/x/fun"));
    }

    #[test]
    fn test_disjunction_over_patterns() {
        let m = compile(&["/", "re:/fun"]);
        assert!(m.matches("/"));
        assert!(m.matches("/func"));
        assert!(!m.matches("/other"));
    }

    #[test]
    fn test_empty_matcher_never_matches() {
        let m = PathMatcher::none();
        assert!(m.is_empty());
        assert!(!m.matches("/anything"));
        assert!(!m.matches(""));
    }

    #[test]
    fn test_custom_predicate() {
        let m = PathMatcher::from_fn(|path| path.contains("health"));
        assert!(!m.is_empty());
        assert!(m.matches("/internal/healthz"));
        assert!(!m.matches("/api"));
    }

    #[test]
    fn test_invalid_regex_is_config_error() {
        let specs = vec!["re:[unclosed".to_string()];
        assert!(matches!(
            PathMatcher::compile(&specs),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_interior_wildcard_rejected() {
        let specs = vec!["/a*b".to_string()];
        assert!(matches!(
            PathMatcher::compile(&specs),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_bare_star_matches_everything() {
        let m = compile(&["*"]);
        assert!(m.matches("/anything"));
        assert!(m.matches(""));
    }
}
