//! Absolute virtual paths: `\`-separated, leading separator required,
//! empty segments collapsed.

use cfs_core::validate_entry_name;
use cfs_error::{Result, VfsError};

pub const SEPARATOR: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualPath {
    segments: Vec<String>,
}

impl VirtualPath {
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with(SEPARATOR) {
            return Err(VfsError::InvalidPath(format!(
                "path must be absolute: {raw:?}"
            )));
        }
        let mut segments = Vec::new();
        for segment in raw.split(SEPARATOR) {
            if segment.is_empty() {
                continue;
            }
            validate_entry_name(segment)?;
            segments.push(segment.to_owned());
        }
        Ok(Self { segments })
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// All segments except the last; empty at the root.
    #[must_use]
    pub fn parent_segments(&self) -> &[String] {
        let end = self.segments.len().saturating_sub(1);
        &self.segments[..end]
    }

    /// The last segment, `None` at the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    #[must_use]
    pub fn full_path(&self) -> String {
        if self.segments.is_empty() {
            SEPARATOR.to_string()
        } else {
            format!("{SEPARATOR}{}", self.segments.join("\\"))
        }
    }

    #[must_use]
    pub fn parent_path(&self) -> String {
        let parents = self.parent_segments();
        if parents.is_empty() {
            SEPARATOR.to_string()
        } else {
            format!("{SEPARATOR}{}", parents.join("\\"))
        }
    }

    /// Join a parent path and a child name.
    #[must_use]
    pub fn combine(parent: &str, name: &str) -> String {
        if parent.ends_with(SEPARATOR) {
            format!("{parent}{name}")
        } else {
            format!("{parent}{SEPARATOR}{name}")
        }
    }

    /// Case-insensitive path equality (names match the way lookups do).
    #[must_use]
    pub fn equals_ignore_case(&self, other: &Self) -> bool {
        segments_equal_ignore_case(&self.segments, &other.segments)
    }
}

pub(crate) fn segments_equal_ignore_case(a: &[String], b: &[String]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.to_lowercase() == y.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_collapses() {
        let path = VirtualPath::parse("\\a\\\\b\\c").unwrap();
        assert_eq!(path.segments(), ["a", "b", "c"]);
        assert_eq!(path.full_path(), "\\a\\b\\c");
        assert_eq!(path.parent_path(), "\\a\\b");
        assert_eq!(path.name(), Some("c"));
    }

    #[test]
    fn root_path() {
        let root = VirtualPath::parse("\\").unwrap();
        assert!(root.is_root());
        assert_eq!(root.name(), None);
        assert_eq!(root.full_path(), "\\");
        assert_eq!(root.parent_path(), "\\");
    }

    #[test]
    fn rejects_relative_and_bad_segments() {
        assert!(VirtualPath::parse("a\\b").is_err());
        assert!(VirtualPath::parse("").is_err());
        assert!(VirtualPath::parse("\\a\\b*c").is_err());
        assert!(VirtualPath::parse("\\a\\b:c").is_err());
    }

    #[test]
    fn combine_handles_root() {
        assert_eq!(VirtualPath::combine("\\", "x"), "\\x");
        assert_eq!(VirtualPath::combine("\\a", "x"), "\\a\\x");
    }

    #[test]
    fn case_insensitive_equality() {
        let a = VirtualPath::parse("\\Docs\\File.TXT").unwrap();
        let b = VirtualPath::parse("\\docs\\file.txt").unwrap();
        assert!(a.equals_ignore_case(&b));
        let c = VirtualPath::parse("\\docs\\other.txt").unwrap();
        assert!(!a.equals_ignore_case(&c));
    }
}
