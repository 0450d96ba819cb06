use std::fmt;

use crate::{Error, Result};

/// The type of a [`crate::Value`], mirroring the D-Bus/GVariant type system.
///
/// This is a tree rather than a wire-format string so that constructors and validators can work
/// with it directly; [`Signature::to_string`] renders it to the textual form used on the wire and
/// in method signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Signature {
    Bool,
    Byte,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    String,
    ObjectPath,
    Signature,
    /// A 32-bit index into a message's attached file-descriptor list.
    Handle,
    Maybe(Box<Signature>),
    Array(Box<Signature>),
    Struct(Vec<Signature>),
    Dict {
        key: Box<Signature>,
        value: Box<Signature>,
    },
    Variant,
}

impl Signature {
    /// Basic types are the only types allowed as dict keys and as the element type of a maybe.
    pub fn is_basic(&self) -> bool {
        matches!(
            self,
            Signature::Bool
                | Signature::Byte
                | Signature::Int16
                | Signature::Uint16
                | Signature::Int32
                | Signature::Uint32
                | Signature::Int64
                | Signature::Uint64
                | Signature::Double
                | Signature::String
                | Signature::ObjectPath
                | Signature::Signature
                | Signature::Handle
        )
    }

    /// Parse a single complete type from a signature string, erroring if trailing bytes remain.
    pub fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars().peekable();
        let ty = parse_one(&mut chars)?;
        if chars.next().is_some() {
            return Err(Error::InvalidSignature(format!(
                "trailing characters after signature `{s}`"
            )));
        }
        Ok(ty)
    }

    /// Parse a possibly-empty sequence of complete types (as used for method/struct bodies).
    pub fn parse_fields(s: &str) -> Result<Vec<Self>> {
        let mut chars = s.chars().peekable();
        let mut fields = Vec::new();
        while chars.peek().is_some() {
            fields.push(parse_one(&mut chars)?);
        }
        Ok(fields)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signature::Bool => write!(f, "b"),
            Signature::Byte => write!(f, "y"),
            Signature::Int16 => write!(f, "n"),
            Signature::Uint16 => write!(f, "q"),
            Signature::Int32 => write!(f, "i"),
            Signature::Uint32 => write!(f, "u"),
            Signature::Int64 => write!(f, "x"),
            Signature::Uint64 => write!(f, "t"),
            Signature::Double => write!(f, "d"),
            Signature::String => write!(f, "s"),
            Signature::ObjectPath => write!(f, "o"),
            Signature::Signature => write!(f, "g"),
            Signature::Handle => write!(f, "h"),
            Signature::Variant => write!(f, "v"),
            Signature::Maybe(t) => write!(f, "m{t}"),
            Signature::Array(t) => write!(f, "a{t}"),
            Signature::Struct(fields) => {
                write!(f, "(")?;
                for field in fields {
                    write!(f, "{field}")?;
                }
                write!(f, ")")
            }
            Signature::Dict { key, value } => write!(f, "a{{{key}{value}}}"),
        }
    }
}

type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

fn parse_one(chars: &mut Chars<'_>) -> Result<Signature> {
    let c = chars
        .next()
        .ok_or_else(|| Error::InvalidSignature("unexpected end of signature".to_owned()))?;
    match c {
        'b' => Ok(Signature::Bool),
        'y' => Ok(Signature::Byte),
        'n' => Ok(Signature::Int16),
        'q' => Ok(Signature::Uint16),
        'i' => Ok(Signature::Int32),
        'u' => Ok(Signature::Uint32),
        'x' => Ok(Signature::Int64),
        't' => Ok(Signature::Uint64),
        'd' => Ok(Signature::Double),
        's' => Ok(Signature::String),
        'o' => Ok(Signature::ObjectPath),
        'g' => Ok(Signature::Signature),
        'h' => Ok(Signature::Handle),
        'v' => Ok(Signature::Variant),
        'm' => Ok(Signature::Maybe(Box::new(parse_one(chars)?))),
        'a' => {
            if chars.peek() == Some(&'{') {
                chars.next();
                let key = parse_one(chars)?;
                if !key.is_basic() {
                    return Err(Error::InvalidSignature(
                        "dict-entry key must be a basic type".to_owned(),
                    ));
                }
                let value = parse_one(chars)?;
                match chars.next() {
                    Some('}') => Ok(Signature::Dict {
                        key: Box::new(key),
                        value: Box::new(value),
                    }),
                    _ => Err(Error::InvalidSignature("unterminated dict entry".to_owned())),
                }
            } else {
                Ok(Signature::Array(Box::new(parse_one(chars)?)))
            }
        }
        '(' => {
            let mut fields = Vec::new();
            loop {
                match chars.peek() {
                    Some(')') => {
                        chars.next();
                        break;
                    }
                    Some(_) => fields.push(parse_one(chars)?),
                    None => {
                        return Err(Error::InvalidSignature("unterminated struct".to_owned()))
                    }
                }
            }
            Ok(Signature::Struct(fields))
        }
        other => Err(Error::InvalidSignature(format!(
            "unknown signature character `{other}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        for s in ["i", "as", "a{sv}", "(sii)", "ms", "(a{sv}as)"] {
            let ty = Signature::from_str(s).unwrap();
            assert_eq!(ty.to_string(), s);
        }
    }

    #[test]
    fn rejects_non_basic_dict_key() {
        assert!(Signature::from_str("a{vs}").is_err());
    }
}
