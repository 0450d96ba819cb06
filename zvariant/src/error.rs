use std::fmt;

/// Errors raised while building, parsing or (de)serializing [`crate::Value`]s and the types that
/// back them (signatures, object paths, ...).
#[derive(Debug)]
pub enum Error {
    /// A value of an unexpected type was encountered (e.g. adding a `u32` child to an array of
    /// `s`).
    IncorrectType,
    /// A signature, object path or UTF-8 string failed to validate.
    InvalidSignature(String),
    /// Generic malformed-input error, used for normal-form violations and the text parser.
    Message(String),
    /// I/O error while reading or writing serialized bytes.
    Io(std::io::Error),
    /// A container was given no children and the element type could not be inferred.
    CouldNotInferType,
    /// A lookup by key was attempted on a container that isn't a dict.
    NotADict,
    /// The end of the data was reached while decoding.
    OutOfBounds,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IncorrectType => write!(f, "incorrect type"),
            Error::InvalidSignature(s) => write!(f, "invalid signature: {s}"),
            Error::Message(s) => write!(f, "{s}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::CouldNotInferType => {
                write!(f, "cannot infer element type from an empty container")
            }
            Error::NotADict => write!(f, "value is not a dict"),
            Error::OutOfBounds => write!(f, "not enough data to decode a value"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Error::Message(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
