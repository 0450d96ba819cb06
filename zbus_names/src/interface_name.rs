use std::fmt;

use serde::{Deserialize, Serialize};
use zvariant::{Error, Result, Signature, Type};

use crate::validate_dotted;

/// A D-Bus interface name, e.g. `org.freedesktop.DBus.Properties` (an `Interface`
/// registration key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName(String);

impl InterfaceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        validate_dotted("interface name", &s)?;
        Ok(Self(s))
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::try_from(s.to_owned())
    }
}

impl From<InterfaceName> for String {
    fn from(n: InterfaceName) -> String {
        n.0
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Deref for InterfaceName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Type for InterfaceName {
    fn signature() -> Signature {
        Signature::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates() {
        assert!(InterfaceName::try_from("org.freedesktop.DBus.Properties").is_ok());
        assert!(InterfaceName::try_from("NoDot").is_err());
        assert!(InterfaceName::try_from("org.2bad").is_err());
    }
}
