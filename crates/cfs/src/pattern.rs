//! Wildcard name matching: `*` matches any run of characters, `?`
//! matches exactly one. Compiled to an anchored case-insensitive regex.

use cfs_error::{Result, VfsError};
use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone)]
pub struct SearchPattern {
    regex: Regex,
    raw: String,
}

impl SearchPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                _ => {
                    let mut buf = [0_u8; 4];
                    expr.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
                }
            }
        }
        expr.push('$');
        let regex = RegexBuilder::new(&expr)
            .case_insensitive(true)
            .build()
            .map_err(|_| VfsError::InvalidPath(format!("bad search pattern: {pattern:?}")))?;
        Ok(Self {
            regex,
            raw: pattern.to_owned(),
        })
    }

    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_literals() {
        assert!(SearchPattern::new("p*te?n").unwrap().matches("pattern"));
        assert!(SearchPattern::new("*ab?e").unwrap().matches("zabcdabce"));
        assert!(SearchPattern::new("??t").unwrap().matches("pat"));
    }

    #[test]
    fn anchored_and_exact() {
        let p = SearchPattern::new("*.txt").unwrap();
        assert!(p.matches("notes.txt"));
        assert!(p.matches(".txt"));
        assert!(!p.matches("notes.txt.bak"));

        let q = SearchPattern::new("data").unwrap();
        assert!(q.matches("data"));
        assert!(!q.matches("dat"));
        assert!(!q.matches("database"));
    }

    #[test]
    fn question_mark_is_one_character() {
        let p = SearchPattern::new("??t").unwrap();
        assert!(!p.matches("at"));
        assert!(!p.matches("salt"));
    }

    #[test]
    fn case_insensitive() {
        let p = SearchPattern::new("*.TXT").unwrap();
        assert!(p.matches("readme.txt"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let p = SearchPattern::new("a+b(c)").unwrap();
        assert!(p.matches("a+b(c)"));
        assert!(!p.matches("aab(c)"));
        assert!(!p.matches("abc"));
    }
}
