use std::fmt;

use crate::{Error, Result, Signature, Type};

/// A validated D-Bus object path, e.g. `/org/freedesktop/DBus`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Validate and construct an `ObjectPath` from a string.
    pub fn try_new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        validate(&s)?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `self` is a (non-strict) prefix of `other`, or vice-versa, as defined for
    /// `arg0path` match rule matching: the shorter path must end exactly at a `/` boundary of the
    /// longer one, or the two must be equal.
    pub fn is_path_prefix_match(&self, other: &str) -> bool {
        path_prefix_match(self.as_str(), other)
    }

    /// The immediate parent of this path, or `None` for the root path.
    pub fn parent(&self) -> Option<&str> {
        if self.0 == "/" {
            return None;
        }
        let idx = self.0.rfind('/')?;
        Some(if idx == 0 { "/" } else { &self.0[..idx] })
    }
}

/// Shared by [`ObjectPath::is_path_prefix_match`] and the connection façade's arg0path matching:
/// one of `a` or `b` must be a prefix of the other at a `/` boundary.
pub(crate) fn path_prefix_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (shorter, longer) = if a.len() < b.len() { (a, b) } else { (b, a) };
    let shorter_slash = if shorter.ends_with('/') {
        shorter.to_owned()
    } else {
        format!("{shorter}/")
    };
    longer.starts_with(&shorter_slash)
}

impl TryFrom<String> for ObjectPath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::try_new(s)
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::try_new(s.to_owned())
    }
}

impl From<ObjectPath> for String {
    fn from(p: ObjectPath) -> String {
        p.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Deref for ObjectPath {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ObjectPath {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl Type for ObjectPath {
    fn signature() -> Signature {
        Signature::ObjectPath
    }
}

fn validate(s: &str) -> Result<()> {
    if !s.starts_with('/') {
        return Err(Error::InvalidSignature(format!(
            "object path `{s}` must start with `/`"
        )));
    }
    if s.len() > 1 && s.ends_with('/') {
        return Err(Error::InvalidSignature(format!(
            "object path `{s}` must not end with `/` unless it is the root"
        )));
    }
    for element in s.split('/').skip(1) {
        if element.is_empty() {
            return Err(Error::InvalidSignature(format!(
                "object path `{s}` contains an empty element"
            )));
        }
        if !element
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(Error::InvalidSignature(format!(
                "object path `{s}` contains invalid characters"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates() {
        assert!(ObjectPath::try_new("/").is_ok());
        assert!(ObjectPath::try_new("/a/b_2").is_ok());
        assert!(ObjectPath::try_new("").is_err());
        assert!(ObjectPath::try_new("a/b").is_err());
        assert!(ObjectPath::try_new("/a/").is_err());
        assert!(ObjectPath::try_new("/a//b").is_err());
        assert!(ObjectPath::try_new("/a.b").is_err());
    }

    #[test]
    fn path_prefix() {
        assert!(path_prefix_match("/a/b/", "/a/b/c"));
        assert!(path_prefix_match("/a/b", "/a/b/c"));
        assert!(!path_prefix_match("/a/bb", "/a/b"));
        assert!(path_prefix_match("/a/b", "/a/b"));
    }

    #[test]
    fn parent() {
        let p = ObjectPath::try_new("/a/b").unwrap();
        assert_eq!(p.parent(), Some("/a"));
        let root = ObjectPath::try_new("/").unwrap();
        assert_eq!(root.parent(), None);
        let one = ObjectPath::try_new("/a").unwrap();
        assert_eq!(one.parent(), Some("/"));
    }
}
