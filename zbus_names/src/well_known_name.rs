use std::fmt;

use serde::{Deserialize, Serialize};
use zvariant::{Error, Result, Signature, Type};

use crate::validate_dotted;

/// A bus name requested by a client (e.g. `org.freedesktop.Notifications`), as opposed to the
/// bus-assigned [`crate::UniqueName`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WellKnownName(String);

impl WellKnownName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WellKnownName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        if s.starts_with(':') {
            return Err(Error::InvalidSignature(format!(
                "well-known bus name `{s}` must not start with `:`"
            )));
        }
        validate_dotted("well-known bus name", &s)?;
        Ok(Self(s))
    }
}

impl TryFrom<&str> for WellKnownName {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::try_from(s.to_owned())
    }
}

impl From<WellKnownName> for String {
    fn from(n: WellKnownName) -> String {
        n.0
    }
}

impl fmt::Display for WellKnownName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Deref for WellKnownName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Type for WellKnownName {
    fn signature() -> Signature {
        Signature::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates() {
        assert!(WellKnownName::try_from("org.freedesktop.DBus").is_ok());
        assert!(WellKnownName::try_from("org").is_err());
        assert!(WellKnownName::try_from(":1.1").is_err());
        assert!(WellKnownName::try_from("org.3freedesktop").is_err());
    }
}
