//! The D-Bus/GVariant self-describing value type: a tagged-union [`Value`] tree, its
//! [`Signature`], incremental builders, and a wire codec.
//!
//! This crate deliberately skips a generic, zero-copy, lifetime-parameterized
//! `Value<'a>`/`Dynamic(Signature, Box<dyn ...>)` machinery and a `serde`-backend-driven
//! (de)serializer: every value here is owned outright and the codec walks the [`Value`] tree
//! directly.

mod builders;
mod codec;
mod endian;
mod error;
mod object_path;
mod signature;
mod ty;
mod value;

pub use builders::{ArrayBuilder, DictBuilder, StructBuilder};
pub use codec::{decode_at, from_bytes, to_bytes};
pub use endian::{Context, Endian};
pub use error::{Error, Result};
pub use object_path::ObjectPath;
pub use signature::Signature;
pub use ty::{Basic, Handle, Type};
pub use value::Value;
