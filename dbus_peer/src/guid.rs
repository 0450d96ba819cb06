use std::fmt;

use rand::RngCore;

use crate::{Error, Result};

/// A 32-hex-character identifier a server offers during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Guid(String);

impl Guid {
    /// Generate a new random GUID.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Guid {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidArgument(format!(
                "`{s}` is not a valid 32-hex-character GUID"
            )));
        }
        Ok(Self(s.to_lowercase()))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_valid() {
        let guid = Guid::generate();
        assert!(Guid::try_from(guid.as_str()).is_ok());
    }

    #[test]
    fn rejects_bad_length() {
        assert!(Guid::try_from("deadbeef").is_err());
    }
}
