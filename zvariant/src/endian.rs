/// Wire byte order, carried as a runtime value rather than as a generic `ByteOrder` type
/// parameter threaded through `Connection<O>`/`Message<O>` — the only endianness requirements
/// here are the single marker byte and the [`crate::Value::byteswap`] operation, both of which
/// a plain enum expresses without pushing a type parameter through
/// every downstream module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// The native endianness of the host this code is compiled for.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    /// The D-Bus wire marker byte for this endianness (`'l'` or `'B'`).
    pub fn marker(self) -> u8 {
        match self {
            Endian::Little => b'l',
            Endian::Big => b'B',
        }
    }

    pub fn from_marker(marker: u8) -> crate::Result<Self> {
        match marker {
            b'l' => Ok(Endian::Little),
            b'B' => Ok(Endian::Big),
            _ => Err(crate::Error::Message(format!(
                "invalid endianness marker {marker:#x}"
            ))),
        }
    }
}

/// Serialization/deserialization context: just the byte order for this crate's simplified,
/// non-generic wire codec.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub endian: Endian,
}

impl Context {
    pub fn new(endian: Endian) -> Self {
        Self { endian }
    }

    pub fn native() -> Self {
        Self::new(Endian::native())
    }
}
