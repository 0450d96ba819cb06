use std::fmt;

use serde::{Deserialize, Serialize};
use zvariant::{Error, Result, Signature, Type};

use crate::validate_element;

/// A method, signal or property name: a single element, unlike bus/interface/error names (the
/// `member` header field).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemberName(String);

impl MemberName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MemberName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        if s.is_empty() || s.len() > 255 {
            return Err(Error::InvalidSignature(format!(
                "member name `{s}` must be 1 to 255 bytes long"
            )));
        }
        if s.contains('.') {
            return Err(Error::InvalidSignature(format!(
                "member name `{s}` must not contain `.`"
            )));
        }
        validate_element("member name", &s, &s)?;
        Ok(Self(s))
    }
}

impl TryFrom<&str> for MemberName {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::try_from(s.to_owned())
    }
}

impl From<MemberName> for String {
    fn from(n: MemberName) -> String {
        n.0
    }
}

impl fmt::Display for MemberName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Deref for MemberName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Type for MemberName {
    fn signature() -> Signature {
        Signature::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates() {
        assert!(MemberName::try_from("GetMachineId").is_ok());
        assert!(MemberName::try_from("bad.name").is_err());
        assert!(MemberName::try_from("2bad").is_err());
    }
}
