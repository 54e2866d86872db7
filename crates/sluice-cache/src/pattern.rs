//! Invalidation patterns.

use regex::Regex;

/// Selects cache keys for invalidation.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    /// A single key.
    Exact(String),
    /// Every key starting with the prefix.
    Prefix(String),
    /// A glob where `*` matches any run of characters.
    Glob(Regex),
}

impl KeyPattern {
    /// Parses a pattern: a string containing `*` is a glob, anything else an
    /// exact key.
    pub fn parse(pattern: &str) -> Self {
        if !pattern.contains('*') {
            return Self::Exact(pattern.to_string());
        }

        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        match Regex::new(&format!("^{body}$")) {
            Ok(re) => Self::Glob(re),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Glob pattern too large, matching literally");
                Self::Exact(pattern.to_string())
            }
        }
    }

    /// Returns true if `key` is selected.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(exact) => key == exact,
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Self::Glob(re) => re.is_match(key),
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_pattern_is_exact() {
        let pattern = KeyPattern::parse("GET /api/products/1");
        assert!(matches!(pattern, KeyPattern::Exact(_)));
        assert!(pattern.matches("GET /api/products/1"));
        assert!(!pattern.matches("GET /api/products/10"));
    }

    #[test]
    fn test_glob_matches_wildcards() {
        let pattern = KeyPattern::parse("GET /api/products/*");
        assert!(pattern.matches("GET /api/products/1"));
        assert!(pattern.matches("GET /api/products/1?expand=true"));
        assert!(!pattern.matches("GET /api/users/1"));

        let pattern = KeyPattern::parse("*?page=*");
        assert!(pattern.matches("GET /search?page=2"));
        assert!(!pattern.matches("GET /search"));
    }

    #[test]
    fn test_glob_escapes_regex_syntax() {
        let pattern = KeyPattern::parse("GET /a.b/*");
        assert!(pattern.matches("GET /a.b/c"));
        assert!(!pattern.matches("GET /axb/c"));
    }

    #[test]
    fn test_prefix() {
        let pattern = KeyPattern::Prefix("GET /api".into());
        assert!(pattern.matches("GET /api/products"));
        assert!(!pattern.matches("POST /api/products"));
    }
}
