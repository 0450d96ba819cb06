use std::fmt;

use serde::{Deserialize, Serialize};
use zvariant::{Error, Result, Signature, Type};

use crate::validate_dotted;

/// A D-Bus error name, e.g. `org.freedesktop.DBus.Error.UnknownMethod` (the `error` message
/// type and the `Error` reply name used throughout the dispatch rules).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ErrorName(String);

impl ErrorName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ErrorName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        validate_dotted("error name", &s)?;
        Ok(Self(s))
    }
}

impl TryFrom<&str> for ErrorName {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::try_from(s.to_owned())
    }
}

impl From<ErrorName> for String {
    fn from(n: ErrorName) -> String {
        n.0
    }
}

impl fmt::Display for ErrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Deref for ErrorName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Type for ErrorName {
    fn signature() -> Signature {
        Signature::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates() {
        assert!(ErrorName::try_from("org.freedesktop.DBus.Error.UnknownMethod").is_ok());
        assert!(ErrorName::try_from("NoDot").is_err());
    }
}
