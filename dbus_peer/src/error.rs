use std::fmt;

/// The error taxonomy raised or propagated by this crate: every public operation fails with
/// one of these, never a bare I/O or parse error.
#[derive(Debug)]
pub enum Error {
    /// Malformed address, malformed message, unsupported flag combination, type mismatch on a
    /// reply, or unsupported auth mechanism.
    InvalidArgument(String),
    /// Operation on a connection that is closed, or was closed by the peer while pending.
    Closed,
    /// A pending call's timeout elapsed.
    TimedOut,
    /// A platform feature this build or OS lacks (e.g. abstract-namespace sockets).
    NotSupported(String),
    /// A `(path, interface)` or `(path)` subtree is already registered.
    Exists,
    /// A decoded `method_return` of type `error` from the peer, not yet mapped to a local error.
    MethodError {
        name: String,
        message: Option<String>,
    },
    /// Everything else: auth failure, autolaunch failure, machine-id unavailable, I/O.
    Failed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(m) => write!(f, "invalid argument: {m}"),
            Error::Closed => write!(f, "the connection is closed"),
            Error::TimedOut => write!(f, "operation timed out"),
            Error::NotSupported(m) => write!(f, "not supported: {m}"),
            Error::Exists => write!(f, "already registered"),
            Error::MethodError { name, message } => match message {
                Some(m) => write!(f, "{name}: {m}"),
                None => write!(f, "{name}"),
            },
            Error::Failed(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Failed(e.to_string())
    }
}

impl From<zvariant::Error> for Error {
    fn from(e: zvariant::Error) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_error_display_includes_detail_when_present() {
        let err = Error::MethodError {
            name: "org.freedesktop.DBus.Error.Failed".to_owned(),
            message: Some("no such object".to_owned()),
        };
        assert_eq!(err.to_string(), "org.freedesktop.DBus.Error.Failed: no such object");
    }

    #[test]
    fn method_error_display_omits_colon_when_detail_is_absent() {
        let err = Error::MethodError {
            name: "org.freedesktop.DBus.Error.UnknownMethod".to_owned(),
            message: None,
        };
        assert_eq!(err.to_string(), "org.freedesktop.DBus.Error.UnknownMethod");
    }

    #[test]
    fn io_error_becomes_failed() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Failed(m) if m.contains("pipe gone")));
    }

    #[test]
    fn distinct_variants_have_distinct_messages() {
        assert_eq!(Error::Closed.to_string(), "the connection is closed");
        assert_eq!(Error::TimedOut.to_string(), "operation timed out");
        assert_eq!(Error::Exists.to_string(), "already registered");
    }
}
