use std::fmt;

use serde::{Deserialize, Serialize};
use zvariant::{Error, Result, Signature, Type};

/// The `:x.y` name the bus assigns a peer on `Hello` (the bus singleton relies on this being
/// stable for the life of a connection).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UniqueName(String);

impl UniqueName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UniqueName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        let rest = s.strip_prefix(':').ok_or_else(|| {
            Error::InvalidSignature(format!("unique bus name `{s}` must start with `:`"))
        })?;
        if s.len() > 255 {
            return Err(Error::InvalidSignature(format!(
                "unique bus name `{s}` must be at most 255 bytes long"
            )));
        }
        let elements: Vec<&str> = rest.split('.').collect();
        if elements.len() < 2 {
            return Err(Error::InvalidSignature(format!(
                "unique bus name `{s}` must have at least two elements after `:`"
            )));
        }
        for element in elements {
            if element.is_empty()
                || !element
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(Error::InvalidSignature(format!(
                    "unique bus name `{s}` has an invalid element `{element}`"
                )));
            }
        }
        Ok(Self(s))
    }
}

impl TryFrom<&str> for UniqueName {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::try_from(s.to_owned())
    }
}

impl From<UniqueName> for String {
    fn from(n: UniqueName) -> String {
        n.0
    }
}

impl fmt::Display for UniqueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Deref for UniqueName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Type for UniqueName {
    fn signature() -> Signature {
        Signature::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates() {
        assert!(UniqueName::try_from(":1.42").is_ok());
        assert!(UniqueName::try_from("1.42").is_err());
        assert!(UniqueName::try_from(":1").is_err());
        assert!(UniqueName::try_from(":1.").is_err());
    }
}
