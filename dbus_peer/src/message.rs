//! The message frame: primary header, header fields, body, and the little/big-endian wire stamp.
//!
//! The core treats the byte-level codec as a simple extension of the variant wire format: the
//! primary header, the header-fields array, and the body are all just nested `zvariant::Value`s,
//! so [`encode`]/[`decode`] are thin wrappers around [`zvariant::to_bytes`]/[`zvariant::decode_at`]
//! rather than a hand-rolled parallel format.

use std::fmt;

use enumflags2::{bitflags, BitFlags};
use zbus_names::{BusName, ErrorName, InterfaceName, MemberName, UniqueName};
use zvariant::{ArrayBuilder, Context, Endian, ObjectPath, Signature, StructBuilder, Value};

use crate::{Error, Result};

fn struct_value(fields: Vec<Value>) -> Value {
    let mut b = StructBuilder::new();
    for field in fields {
        b.append(field).expect("indefinite struct builder never rejects a field");
    }
    b.build().expect("indefinite struct builder never fails to build")
}

fn array_value(element_ty: Signature, items: Vec<Value>) -> Value {
    let mut b = ArrayBuilder::with_type(element_ty);
    for item in items {
        b.append(item)
            .expect("array element type was computed from the same items");
    }
    b.build().expect("array builder with a definite type always builds")
}

#[cfg(unix)]
pub(crate) type OwnedFdVec = Vec<std::os::fd::OwnedFd>;
#[cfg(not(unix))]
pub(crate) type OwnedFdVec = Vec<()>;

pub(crate) const PRIMARY_HEADER_LEN: usize = 16;

/// The number of leading bytes of a frame that are enough to learn its total length.
pub const MIN_HEADER_LEN: usize = 16;

/// Given at least [`MIN_HEADER_LEN`] bytes from the start of a frame, compute the total number of
/// bytes the complete message (header + fields array + padding + body) will occupy.
pub fn header_lengths(prefix: &[u8]) -> Result<usize> {
    if prefix.len() < MIN_HEADER_LEN {
        return Err(Error::InvalidArgument(
            "need at least 16 bytes to frame a message".into(),
        ));
    }
    let endian = Endian::from_marker(prefix[0])?;
    let read_u32 = |off: usize| -> usize {
        let b = [prefix[off], prefix[off + 1], prefix[off + 2], prefix[off + 3]];
        (match endian {
            Endian::Little => u32::from_le_bytes(b),
            Endian::Big => u32::from_be_bytes(b),
        }) as usize
    };
    let body_len = read_u32(4);
    let fields_len = read_u32(12);
    let mut header_end = MIN_HEADER_LEN + fields_len;
    while header_end % 8 != 0 {
        header_end += 1;
    }
    Ok(header_end + body_len)
}

/// The D-Bus message type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    MethodCall,
    MethodReturn,
    Error,
    Signal,
}

impl MessageType {
    fn to_byte(self) -> u8 {
        match self {
            MessageType::MethodCall => 1,
            MessageType::MethodReturn => 2,
            MessageType::Error => 3,
            MessageType::Signal => 4,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(MessageType::MethodCall),
            2 => Ok(MessageType::MethodReturn),
            3 => Ok(MessageType::Error),
            4 => Ok(MessageType::Signal),
            other => Err(Error::InvalidArgument(format!(
                "unknown message type byte {other}"
            ))),
        }
    }
}

/// Message header flags.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flags {
    NoReplyExpected = 0x1,
    NoAutoStart = 0x2,
    AllowInteractiveAuthorization = 0x4,
}

const FIELD_PATH: u8 = 1;
const FIELD_INTERFACE: u8 = 2;
const FIELD_MEMBER: u8 = 3;
const FIELD_ERROR_NAME: u8 = 4;
const FIELD_REPLY_SERIAL: u8 = 5;
const FIELD_DESTINATION: u8 = 6;
const FIELD_SENDER: u8 = 7;
const FIELD_SIGNATURE: u8 = 8;
const FIELD_UNIX_FDS: u8 = 9;

/// One entry of the header-fields array.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Path(ObjectPath),
    Interface(InterfaceName),
    Member(MemberName),
    ErrorName(ErrorName),
    ReplySerial(u32),
    Destination(BusName),
    Sender(UniqueName),
    Signature(Signature),
    UnixFds(u32),
}

impl Field {
    fn code(&self) -> u8 {
        match self {
            Field::Path(_) => FIELD_PATH,
            Field::Interface(_) => FIELD_INTERFACE,
            Field::Member(_) => FIELD_MEMBER,
            Field::ErrorName(_) => FIELD_ERROR_NAME,
            Field::ReplySerial(_) => FIELD_REPLY_SERIAL,
            Field::Destination(_) => FIELD_DESTINATION,
            Field::Sender(_) => FIELD_SENDER,
            Field::Signature(_) => FIELD_SIGNATURE,
            Field::UnixFds(_) => FIELD_UNIX_FDS,
        }
    }

    fn to_value(&self) -> Value {
        let variant = match self {
            Field::Path(p) => Value::object_path(p.clone()),
            Field::Interface(n) => Value::string(n.as_str()),
            Field::Member(n) => Value::string(n.as_str()),
            Field::ErrorName(n) => Value::string(n.as_str()),
            Field::ReplySerial(n) => Value::uint32(*n),
            Field::Destination(n) => Value::string(n.as_str()),
            Field::Sender(n) => Value::string(n.as_str()),
            Field::Signature(s) => Value::signature(s.clone()),
            Field::UnixFds(n) => Value::uint32(*n),
        };
        struct_value(vec![Value::byte(self.code()), Value::variant(variant)])
    }

    fn from_code_and_value(code: u8, value: Value) -> Result<Self> {
        let inner = value.as_variant().ok_or_else(|| {
            Error::InvalidArgument("header field value must be a variant".into())
        })?;
        match code {
            FIELD_PATH => Ok(Field::Path(
                inner.as_object_path().cloned().ok_or(bad_field("path"))?,
            )),
            FIELD_INTERFACE => Ok(Field::Interface(
                InterfaceName::try_from(inner.as_str().ok_or(bad_field("interface"))?)
                    .map_err(Error::from)?,
            )),
            FIELD_MEMBER => Ok(Field::Member(
                MemberName::try_from(inner.as_str().ok_or(bad_field("member"))?)
                    .map_err(Error::from)?,
            )),
            FIELD_ERROR_NAME => Ok(Field::ErrorName(
                ErrorName::try_from(inner.as_str().ok_or(bad_field("error_name"))?)
                    .map_err(Error::from)?,
            )),
            FIELD_REPLY_SERIAL => Ok(Field::ReplySerial(
                inner.as_u32().ok_or(bad_field("reply_serial"))?,
            )),
            FIELD_DESTINATION => Ok(Field::Destination(
                BusName::try_from(inner.as_str().ok_or(bad_field("destination"))?)
                    .map_err(Error::from)?,
            )),
            FIELD_SENDER => Ok(Field::Sender(
                UniqueName::try_from(inner.as_str().ok_or(bad_field("sender"))?)
                    .map_err(Error::from)?,
            )),
            FIELD_SIGNATURE => Ok(Field::Signature(
                inner.as_signature().cloned().ok_or(bad_field("signature"))?,
            )),
            FIELD_UNIX_FDS => Ok(Field::UnixFds(inner.as_u32().ok_or(bad_field("unix_fds"))?)),
            other => Err(Error::InvalidArgument(format!(
                "unknown header field code {other}"
            ))),
        }
    }
}

fn bad_field(name: &str) -> Error {
    Error::InvalidArgument(format!("header field `{name}` has the wrong value type"))
}

/// The header-fields array, keyed implicitly by field code (at most one of each per message).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<Field>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: Field) {
        self.0.retain(|f| f.code() != field.code());
        self.0.push(field);
    }

    pub fn path(&self) -> Option<&ObjectPath> {
        self.0.iter().find_map(|f| match f {
            Field::Path(p) => Some(p),
            _ => None,
        })
    }

    pub fn interface(&self) -> Option<&InterfaceName> {
        self.0.iter().find_map(|f| match f {
            Field::Interface(n) => Some(n),
            _ => None,
        })
    }

    pub fn member(&self) -> Option<&MemberName> {
        self.0.iter().find_map(|f| match f {
            Field::Member(n) => Some(n),
            _ => None,
        })
    }

    pub fn error_name(&self) -> Option<&ErrorName> {
        self.0.iter().find_map(|f| match f {
            Field::ErrorName(n) => Some(n),
            _ => None,
        })
    }

    pub fn reply_serial(&self) -> Option<u32> {
        self.0.iter().find_map(|f| match f {
            Field::ReplySerial(n) => Some(*n),
            _ => None,
        })
    }

    pub fn destination(&self) -> Option<&BusName> {
        self.0.iter().find_map(|f| match f {
            Field::Destination(n) => Some(n),
            _ => None,
        })
    }

    pub fn sender(&self) -> Option<&UniqueName> {
        self.0.iter().find_map(|f| match f {
            Field::Sender(n) => Some(n),
            _ => None,
        })
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.0.iter().find_map(|f| match f {
            Field::Signature(s) => Some(s),
            _ => None,
        })
    }

    fn to_value(&self) -> Value {
        array_value(
            Signature::Struct(vec![Signature::Byte, Signature::Variant]),
            self.0.iter().map(Field::to_value).collect(),
        )
    }

    fn from_value(value: &Value) -> Result<Self> {
        let mut fields = Vec::new();
        for entry in value.iter() {
            let code = entry
                .get_child(0)
                .and_then(Value::as_byte)
                .ok_or_else(|| Error::InvalidArgument("malformed header field entry".into()))?;
            let inner = entry.get_child(1).cloned().ok_or_else(|| {
                Error::InvalidArgument("malformed header field entry".into())
            })?;
            fields.push(Field::from_code_and_value(code, inner)?);
        }
        Ok(Self(fields))
    }
}

/// A complete D-Bus message: primary header, fields, body, and (on unix) attached fds.
///
/// Locking is monotonic: a message is mutable until the first time it is handed to a
/// connection for sending, after which [`Message::lock`] makes further field mutation a logic
/// error the caller must avoid (enforced here by consuming `self` in the setters, so a locked
/// clone never escapes accidentally).
#[derive(Debug, Clone)]
pub struct Message {
    endian: Endian,
    msg_type: MessageType,
    flags: BitFlags<Flags>,
    serial: u32,
    fields: Fields,
    body: Value,
    locked: bool,
    fds: OwnedFdVecClone,
}

/// `OwnedFd` is not `Clone`; messages built locally never carry fds, so cloning one only needs
/// to produce an empty list, never to duplicate a real descriptor.
#[derive(Debug, Default)]
pub(crate) struct OwnedFdVecClone(pub(crate) OwnedFdVec);

impl Clone for OwnedFdVecClone {
    fn clone(&self) -> Self {
        Self(OwnedFdVec::new())
    }
}

impl Message {
    pub fn method_call(path: ObjectPath, member: MemberName) -> Self {
        let mut fields = Fields::new();
        fields.add(Field::Path(path));
        fields.add(Field::Member(member));
        Self::new(MessageType::MethodCall, fields, struct_value(vec![]))
    }

    pub fn method_return(reply_serial: u32) -> Self {
        let mut fields = Fields::new();
        fields.add(Field::ReplySerial(reply_serial));
        Self::new(MessageType::MethodReturn, fields, struct_value(vec![]))
    }

    pub fn error(reply_serial: u32, name: ErrorName) -> Self {
        let mut fields = Fields::new();
        fields.add(Field::ReplySerial(reply_serial));
        fields.add(Field::ErrorName(name));
        Self::new(MessageType::Error, fields, struct_value(vec![]))
    }

    pub fn signal(path: ObjectPath, interface: InterfaceName, member: MemberName) -> Self {
        let mut fields = Fields::new();
        fields.add(Field::Path(path));
        fields.add(Field::Interface(interface));
        fields.add(Field::Member(member));
        Self::new(MessageType::Signal, fields, struct_value(vec![]))
    }

    fn new(msg_type: MessageType, fields: Fields, body: Value) -> Self {
        Self {
            endian: Endian::native(),
            msg_type,
            flags: BitFlags::empty(),
            serial: 0,
            fields,
            body,
            locked: false,
            fds: OwnedFdVecClone::default(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn flags(&self) -> BitFlags<Flags> {
        self.flags
    }

    pub fn set_flags(&mut self, flags: BitFlags<Flags>) -> Result<()> {
        self.check_unlocked()?;
        self.flags = flags;
        Ok(())
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> Result<&mut Fields> {
        self.check_unlocked()?;
        Ok(&mut self.fields)
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// `body` must already be a struct (tuple) value; non-tuple bodies should be wrapped by the
    /// caller first since the wire body is always the struct's fields concatenated.
    pub fn set_body(&mut self, body: Value) -> Result<()> {
        self.check_unlocked()?;
        self.fields_mut()?.add(Field::Signature(body_signature(&body)));
        self.body = body;
        Ok(())
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Stamp the serial into the fixed header position and lock the message.
    pub(crate) fn assign_serial(&mut self, serial: u32) {
        self.serial = serial;
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn check_unlocked(&self) -> Result<()> {
        if self.locked {
            return Err(Error::InvalidArgument(
                "message has already been sent and can no longer be mutated".into(),
            ));
        }
        Ok(())
    }

    fn header_value(&self) -> Value {
        struct_value(vec![
            Value::byte(self.endian.marker()),
            Value::byte(self.msg_type.to_byte()),
            Value::byte(self.flags.bits()),
            Value::byte(1),
            Value::uint32(body_byte_len(&self.body, self.endian)),
            Value::uint32(self.serial),
            self.fields.to_value(),
        ])
    }

    /// Serialize the whole frame: primary header, fields array, 8-byte pad, then body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let ctxt = Context::new(self.endian);
        let mut bytes = zvariant::to_bytes(ctxt, &self.header_value())?;
        while bytes.len() % 8 != 0 {
            bytes.push(0);
        }
        bytes.extend(zvariant::to_bytes(ctxt, &self.body)?);
        Ok(bytes)
    }

    /// Decode one frame from `bytes`, which must hold exactly one complete message (the caller
    /// is responsible for framing via [`header_lengths`]).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let marker = *bytes.first().ok_or(Error::InvalidArgument("empty message".into()))?;
        let endian = Endian::from_marker(marker)?;
        let ctxt = Context::new(endian);
        let header_ty = Signature::Struct(vec![
            Signature::Byte,
            Signature::Byte,
            Signature::Byte,
            Signature::Byte,
            Signature::Uint32,
            Signature::Uint32,
            Signature::Array(Box::new(Signature::Struct(vec![
                Signature::Byte,
                Signature::Variant,
            ]))),
        ]);
        let mut pos = 0;
        let mut violated = false;
        let header = zvariant::decode_at(ctxt, bytes, &mut pos, &header_ty, true, &mut violated)?;
        while pos % 8 != 0 {
            pos += 1;
        }
        let msg_type = MessageType::from_byte(header.get_child(1).and_then(Value::as_byte).unwrap())?;
        let flags_byte = header.get_child(2).and_then(Value::as_byte).unwrap();
        let flags = BitFlags::<Flags>::from_bits(flags_byte)
            .map_err(|_| Error::InvalidArgument("invalid message flags byte".into()))?;
        let serial = header.get_child(5).and_then(Value::as_u32).unwrap();
        let fields = Fields::from_value(header.get_child(6).unwrap())?;
        let body = match fields.signature() {
            Some(sig) => {
                let body_ty = Signature::Struct(sig_to_fields(sig));
                let mut body_pos = pos;
                let mut body_violated = false;
                zvariant::decode_at(ctxt, bytes, &mut body_pos, &body_ty, false, &mut body_violated)?
            }
            None => struct_value(vec![]),
        };
        Ok(Self {
            endian,
            msg_type,
            flags,
            serial,
            fields,
            body,
            locked: true,
            fds: OwnedFdVecClone::default(),
        })
    }
}

fn sig_to_fields(sig: &Signature) -> Vec<Signature> {
    match sig {
        Signature::Struct(fields) => fields.clone(),
        other => vec![other.clone()],
    }
}

fn body_signature(body: &Value) -> Signature {
    match body.value_signature() {
        Signature::Struct(_) => body.value_signature(),
        other => Signature::Struct(vec![other]),
    }
}

fn body_byte_len(body: &Value, endian: Endian) -> u32 {
    zvariant::to_bytes(Context::new(endian), body)
        .map(|b| b.len() as u32)
        .unwrap_or(0)
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} serial={} path={:?} member={:?}",
            self.msg_type,
            self.serial,
            self.fields.path().map(|p| p.as_str()),
            self.fields.member().map(|m| m.as_str()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_method_call() {
        let iface = InterfaceName::try_from("org.example.I").unwrap();
        let mut msg = Message::signal(
            ObjectPath::try_new("/o").unwrap(),
            iface,
            MemberName::try_from("Changed").unwrap(),
        );
        msg.set_body(struct_value(vec![Value::int32(42)]))
            .unwrap();
        msg.assign_serial(7);
        let bytes = msg.encode().unwrap();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.serial(), 7);
        assert_eq!(decoded.message_type(), MessageType::Signal);
        assert_eq!(decoded.fields().member().unwrap().as_str(), "Changed");
        assert_eq!(decoded.body().get_child(0).unwrap().as_i32(), Some(42));
    }

    #[test]
    fn header_lengths_matches_encoded_size() {
        let mut msg = Message::method_call(
            ObjectPath::try_new("/a").unwrap(),
            MemberName::try_from("Ping").unwrap(),
        );
        msg.set_body(struct_value(vec![Value::string("hi")])).unwrap();
        msg.assign_serial(1);
        let bytes = msg.encode().unwrap();
        assert_eq!(header_lengths(&bytes[..MIN_HEADER_LEN]).unwrap(), bytes.len());
    }
}
