//! Validated, owned D-Bus name types (message header fields and `Interface`
//! registration use these as their key types).
//!
//! The teacher's `zbus_names` borrows every name as `Cow<'a, str>` so a `Message<'a>` can point
//! back into its own wire buffer; this crate's messages own their fields outright (see
//! `DESIGN.md`), so every name type here is a plain owned `String` newtype instead.

mod error_name;
mod interface_name;
mod member_name;
mod unique_name;
mod well_known_name;

pub use error_name::ErrorName;
pub use interface_name::InterfaceName;
pub use member_name::MemberName;
pub use unique_name::UniqueName;
pub use well_known_name::WellKnownName;

use std::fmt;

use serde::{Deserialize, Serialize};
use zvariant::{Error as VariantError, Signature, Type};

/// Either flavor of bus name that can appear in a `sender`/`destination` header field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BusName {
    Unique(UniqueName),
    WellKnown(WellKnownName),
}

impl BusName {
    pub fn as_str(&self) -> &str {
        match self {
            BusName::Unique(n) => n.as_str(),
            BusName::WellKnown(n) => n.as_str(),
        }
    }
}

impl TryFrom<String> for BusName {
    type Error = VariantError;

    fn try_from(s: String) -> Result<Self, VariantError> {
        if s.starts_with(':') {
            UniqueName::try_from(s).map(BusName::Unique)
        } else {
            WellKnownName::try_from(s).map(BusName::WellKnown)
        }
    }
}

impl TryFrom<&str> for BusName {
    type Error = VariantError;

    fn try_from(s: &str) -> Result<Self, VariantError> {
        Self::try_from(s.to_owned())
    }
}

impl From<BusName> for String {
    fn from(n: BusName) -> String {
        match n {
            BusName::Unique(n) => n.into(),
            BusName::WellKnown(n) => n.into(),
        }
    }
}

impl fmt::Display for BusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Type for BusName {
    fn signature() -> Signature {
        Signature::String
    }
}

/// Shared element-syntax check for interface/error names (`[A-Za-z_][A-Za-z0-9_]*`, at least two
/// dot-separated elements, 255 bytes max) — the D-Bus spec defines bus, interface and error names
/// with the same element grammar, only differing in whether a leading `:` (unique names) or a
/// single element (members) is allowed.
pub(crate) fn validate_dotted(kind: &str, s: &str) -> Result<(), VariantError> {
    if s.is_empty() || s.len() > 255 {
        return Err(VariantError::InvalidSignature(format!(
            "{kind} `{s}` must be 1 to 255 bytes long"
        )));
    }
    let elements: Vec<&str> = s.split('.').collect();
    if elements.len() < 2 {
        return Err(VariantError::InvalidSignature(format!(
            "{kind} `{s}` must have at least two elements"
        )));
    }
    for element in elements {
        validate_element(kind, s, element)?;
    }
    Ok(())
}

pub(crate) fn validate_element(kind: &str, whole: &str, element: &str) -> Result<(), VariantError> {
    if element.is_empty() {
        return Err(VariantError::InvalidSignature(format!(
            "{kind} `{whole}` has an empty element"
        )));
    }
    let mut chars = element.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(VariantError::InvalidSignature(format!(
            "{kind} `{whole}` element `{element}` must not start with a digit"
        )));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(VariantError::InvalidSignature(format!(
            "{kind} `{whole}` element `{element}` contains invalid characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_name_dispatches_on_colon() {
        assert!(matches!(
            BusName::try_from("org.freedesktop.DBus").unwrap(),
            BusName::WellKnown(_)
        ));
        assert!(matches!(
            BusName::try_from(":1.42").unwrap(),
            BusName::Unique(_)
        ));
    }
}
