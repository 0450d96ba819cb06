use std::cmp::Ordering;
use std::fmt;

use crate::{Error, ObjectPath, Result, Signature};

/// A self-describing, immutable D-Bus value.
///
/// Every `Value` knows its own [`Signature`] and carries either a fully parsed tree of children
/// (the only representation this crate builds) or was produced by [`Value::from_bytes`] from
/// untrusted wire data, in which case `trusted` records whether the decode found any normal-form
/// violations.
#[derive(Debug, Clone)]
pub struct Value {
    kind: ValueKind,
    trusted: bool,
}

#[derive(Debug, Clone)]
enum ValueKind {
    Bool(bool),
    Byte(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Str(String),
    ObjectPath(ObjectPath),
    Signature(Signature),
    Handle(u32),
    Maybe(Signature, Option<Box<Value>>),
    Array(Signature, Vec<Value>),
    Struct(Vec<Value>),
    Dict(Signature, Signature, Vec<(Value, Value)>),
    Variant(Box<Value>),
}

impl Value {
    fn new(kind: ValueKind) -> Self {
        // Anything built through the constructors/builders in this module is valid by
        // construction (object paths and signatures are validated on the way in), so it is
        // trusted from the start. Only `from_bytes` on untrusted input can produce an untrusted
        // value.
        Value { kind, trusted: true }
    }

    pub fn bool(v: bool) -> Self {
        Self::new(ValueKind::Bool(v))
    }

    pub fn byte(v: u8) -> Self {
        Self::new(ValueKind::Byte(v))
    }

    pub fn int16(v: i16) -> Self {
        Self::new(ValueKind::Int16(v))
    }

    pub fn uint16(v: u16) -> Self {
        Self::new(ValueKind::Uint16(v))
    }

    pub fn int32(v: i32) -> Self {
        Self::new(ValueKind::Int32(v))
    }

    pub fn uint32(v: u32) -> Self {
        Self::new(ValueKind::Uint32(v))
    }

    pub fn int64(v: i64) -> Self {
        Self::new(ValueKind::Int64(v))
    }

    pub fn uint64(v: u64) -> Self {
        Self::new(ValueKind::Uint64(v))
    }

    pub fn double(v: f64) -> Self {
        Self::new(ValueKind::Double(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Self::new(ValueKind::Str(v.into()))
    }

    pub fn object_path(v: ObjectPath) -> Self {
        Self::new(ValueKind::ObjectPath(v))
    }

    pub fn signature(v: Signature) -> Self {
        Self::new(ValueKind::Signature(v))
    }

    pub fn handle(v: u32) -> Self {
        Self::new(ValueKind::Handle(v))
    }

    /// A `maybe(T)` holding no value.
    pub fn nothing(element_ty: Signature) -> Self {
        Self::new(ValueKind::Maybe(element_ty, None))
    }

    /// A `maybe(T)` holding exactly one child of type `T`.
    pub fn just(value: Value) -> Self {
        let ty = value.value_signature();
        Self::new(ValueKind::Maybe(ty, Some(Box::new(value))))
    }

    /// Wrap `value` in a `variant` container, which always holds exactly one child of any type.
    pub fn variant(value: Value) -> Self {
        Self::new(ValueKind::Variant(Box::new(value)))
    }

    /// The type of this value.
    pub fn value_signature(&self) -> Signature {
        match &self.kind {
            ValueKind::Bool(_) => Signature::Bool,
            ValueKind::Byte(_) => Signature::Byte,
            ValueKind::Int16(_) => Signature::Int16,
            ValueKind::Uint16(_) => Signature::Uint16,
            ValueKind::Int32(_) => Signature::Int32,
            ValueKind::Uint32(_) => Signature::Uint32,
            ValueKind::Int64(_) => Signature::Int64,
            ValueKind::Uint64(_) => Signature::Uint64,
            ValueKind::Double(_) => Signature::Double,
            ValueKind::Str(_) => Signature::String,
            ValueKind::ObjectPath(_) => Signature::ObjectPath,
            ValueKind::Signature(_) => Signature::Signature,
            ValueKind::Handle(_) => Signature::Handle,
            ValueKind::Maybe(t, _) => Signature::Maybe(Box::new(t.clone())),
            ValueKind::Array(t, _) => Signature::Array(Box::new(t.clone())),
            ValueKind::Struct(fields) => {
                Signature::Struct(fields.iter().map(Value::value_signature).collect())
            }
            ValueKind::Dict(k, v, _) => Signature::Dict {
                key: Box::new(k.clone()),
                value: Box::new(v.clone()),
            },
            ValueKind::Variant(_) => Signature::Variant,
        }
    }

    /// Whether this value was validated (constructed, or decoded and found free of normal-form
    /// violations).
    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Number of children, for array/struct/dict values (0 for basic/maybe/variant values, which
    /// have no indexed children to count).
    pub fn child_count(&self) -> usize {
        match &self.kind {
            ValueKind::Array(_, items) => items.len(),
            ValueKind::Struct(fields) => fields.len(),
            ValueKind::Dict(_, _, entries) => entries.len(),
            _ => 0,
        }
    }

    /// O(1) indexed child access for arrays and tuples; the in-memory tree makes `Vec`
    /// indexing the natural implementation.
    pub fn get_child(&self, index: usize) -> Option<&Value> {
        match &self.kind {
            ValueKind::Array(_, items) => items.get(index),
            ValueKind::Struct(fields) => fields.get(index),
            _ => None,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        match &self.kind {
            ValueKind::Array(_, items) => items.iter(),
            ValueKind::Struct(fields) => fields.iter(),
            _ => [].iter(),
        }
    }

    /// Look up a dict value by key. Fails with [`Error::NotADict`] if `self` isn't a dict.
    pub fn lookup(&self, key: &Value) -> Result<Option<&Value>> {
        match &self.kind {
            ValueKind::Dict(_, _, entries) => {
                Ok(entries.iter().find(|(k, _)| k == key).map(|(_, v)| v))
            }
            _ => Err(Error::NotADict),
        }
    }

    /// Unwrap one level of `variant` container, if `self` is one.
    pub fn as_variant(&self) -> Option<&Value> {
        match &self.kind {
            ValueKind::Variant(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            ValueKind::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self.kind {
            ValueKind::Uint32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object_path(&self) -> Option<&ObjectPath> {
        match &self.kind {
            ValueKind::ObjectPath(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> Option<u8> {
        match self.kind {
            ValueKind::Byte(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self.kind {
            ValueKind::Int16(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self.kind {
            ValueKind::Uint16(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self.kind {
            ValueKind::Int32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.kind {
            ValueKind::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self.kind {
            ValueKind::Uint64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.kind {
            ValueKind::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_signature(&self) -> Option<&Signature> {
        match &self.kind {
            ValueKind::Signature(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<u32> {
        match self.kind {
            ValueKind::Handle(v) => Some(v),
            _ => None,
        }
    }

    /// `Some(None)` for `nothing`, `Some(Some(child))` for `just child`, `None` if `self` isn't
    /// a `maybe`.
    pub fn as_maybe(&self) -> Option<Option<&Value>> {
        match &self.kind {
            ValueKind::Maybe(_, v) => Some(v.as_deref()),
            _ => None,
        }
    }

    pub fn as_dict_entries(&self) -> Option<&[(Value, Value)]> {
        match &self.kind {
            ValueKind::Dict(_, _, entries) => Some(entries),
            _ => None,
        }
    }

    /// Whether this value's type contains any multi-byte scalar (everything except bool, byte,
    /// and variable-length/container-of-only-single-byte types).
    fn contains_multibyte_scalar(&self) -> bool {
        match &self.kind {
            ValueKind::Int16(_)
            | ValueKind::Uint16(_)
            | ValueKind::Int32(_)
            | ValueKind::Uint32(_)
            | ValueKind::Int64(_)
            | ValueKind::Uint64(_)
            | ValueKind::Double(_)
            | ValueKind::Handle(_) => true,
            ValueKind::Maybe(_, Some(v)) => v.contains_multibyte_scalar(),
            ValueKind::Array(_, items) => items.iter().any(Value::contains_multibyte_scalar),
            ValueKind::Struct(fields) => fields.iter().any(Value::contains_multibyte_scalar),
            ValueKind::Dict(_, _, entries) => entries
                .iter()
                .any(|(k, v)| k.contains_multibyte_scalar() || v.contains_multibyte_scalar()),
            ValueKind::Variant(v) => v.contains_multibyte_scalar(),
            _ => false,
        }
    }

    /// Byteswap every multi-byte scalar in this value's tree. If the type contains none, the
    /// same value is returned unchanged; otherwise a fresh, trusted value is built.
    pub fn byteswap(&self) -> Value {
        if !self.contains_multibyte_scalar() {
            return self.clone();
        }
        let kind = match &self.kind {
            ValueKind::Int16(v) => ValueKind::Int16(v.swap_bytes()),
            ValueKind::Uint16(v) => ValueKind::Uint16(v.swap_bytes()),
            ValueKind::Int32(v) => ValueKind::Int32(v.swap_bytes()),
            ValueKind::Uint32(v) => ValueKind::Uint32(v.swap_bytes()),
            ValueKind::Int64(v) => ValueKind::Int64(v.swap_bytes()),
            ValueKind::Uint64(v) => ValueKind::Uint64(v.swap_bytes()),
            ValueKind::Double(v) => ValueKind::Double(f64::from_bits(v.to_bits().swap_bytes())),
            ValueKind::Handle(v) => ValueKind::Handle(v.swap_bytes()),
            ValueKind::Maybe(t, v) => {
                ValueKind::Maybe(t.clone(), v.as_ref().map(|v| Box::new(v.byteswap())))
            }
            ValueKind::Array(t, items) => {
                ValueKind::Array(t.clone(), items.iter().map(Value::byteswap).collect())
            }
            ValueKind::Struct(fields) => {
                ValueKind::Struct(fields.iter().map(Value::byteswap).collect())
            }
            ValueKind::Dict(k, v, entries) => ValueKind::Dict(
                k.clone(),
                v.clone(),
                entries
                    .iter()
                    .map(|(k, v)| (k.byteswap(), v.byteswap()))
                    .collect(),
            ),
            ValueKind::Variant(v) => ValueKind::Variant(Box::new(v.byteswap())),
            other => other.clone(),
        };
        Value { kind, trusted: true }
    }

    /// Return `self` if already [`Value::is_trusted`], otherwise a freshly validated deep copy.
    ///
    /// Since every value in this crate is constructed through type-checked constructors, the
    /// only source of untrusted values is [`Value::from_bytes`] decoding a malformed byte
    /// stream; re-running that same substitution pass is therefore sufficient to reach a fixed
    /// point.
    pub fn get_normal_form(&self) -> Value {
        if self.trusted {
            return self.clone();
        }
        self.rebuild_trusted()
    }

    fn rebuild_trusted(&self) -> Value {
        let kind = match &self.kind {
            ValueKind::Maybe(t, v) => {
                ValueKind::Maybe(t.clone(), v.as_ref().map(|v| Box::new(v.rebuild_trusted())))
            }
            ValueKind::Array(t, items) => ValueKind::Array(
                t.clone(),
                items.iter().map(Value::rebuild_trusted).collect(),
            ),
            ValueKind::Struct(fields) => {
                ValueKind::Struct(fields.iter().map(Value::rebuild_trusted).collect())
            }
            ValueKind::Dict(k, v, entries) => ValueKind::Dict(
                k.clone(),
                v.clone(),
                entries
                    .iter()
                    .map(|(k, v)| (k.rebuild_trusted(), v.rebuild_trusted()))
                    .collect(),
            ),
            ValueKind::Variant(v) => ValueKind::Variant(Box::new(v.rebuild_trusted())),
            other => other.clone(),
        };
        Value { kind, trusted: true }
    }

    /// The typed default substituted for a malformed sub-value during an untrusted decode:
    /// empty for variable-length types, `/` for object paths, `""` for strings/signatures, zero
    /// for numerics.
    pub(crate) fn raw_array(element_ty: Signature, items: Vec<Value>) -> Value {
        Value::new(ValueKind::Array(element_ty, items))
    }

    pub(crate) fn raw_struct(fields: Vec<Value>) -> Value {
        Value::new(ValueKind::Struct(fields))
    }

    pub(crate) fn raw_dict(key_ty: Signature, value_ty: Signature, entries: Vec<(Value, Value)>) -> Value {
        Value::new(ValueKind::Dict(key_ty, value_ty, entries))
    }

    pub(crate) fn default_for(ty: &Signature) -> Value {
        match ty {
            Signature::Bool => Value::bool(false),
            Signature::Byte => Value::byte(0),
            Signature::Int16 => Value::int16(0),
            Signature::Uint16 => Value::uint16(0),
            Signature::Int32 => Value::int32(0),
            Signature::Uint32 => Value::uint32(0),
            Signature::Int64 => Value::int64(0),
            Signature::Uint64 => Value::uint64(0),
            Signature::Double => Value::double(0.0),
            Signature::String => Value::string(""),
            Signature::ObjectPath => Value::object_path(ObjectPath::try_new("/").unwrap()),
            Signature::Signature => Value::signature(Signature::Struct(vec![])),
            Signature::Handle => Value::handle(0),
            Signature::Maybe(t) => Value::nothing((**t).clone()),
            Signature::Array(t) => Value::new(ValueKind::Array((**t).clone(), vec![])),
            Signature::Struct(fields) => {
                Value::new(ValueKind::Struct(fields.iter().map(Value::default_for).collect()))
            }
            Signature::Dict { key, value } => {
                Value::new(ValueKind::Dict((**key).clone(), (**value).clone(), vec![]))
            }
            Signature::Variant => Value::variant(Value::string("")),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.value_signature() != other.value_signature() {
            return false;
        }
        if self.trusted && other.trusted {
            return structurally_equal(&self.kind, &other.kind);
        }
        // Conservative canonical form: compare the pretty-printed text.
        self.to_string() == other.to_string()
    }
}

impl Eq for Value {}

fn structurally_equal(a: &ValueKind, b: &ValueKind) -> bool {
    use ValueKind::*;
    match (a, b) {
        (Bool(a), Bool(b)) => a == b,
        (Byte(a), Byte(b)) => a == b,
        (Int16(a), Int16(b)) => a == b,
        (Uint16(a), Uint16(b)) => a == b,
        (Int32(a), Int32(b)) => a == b,
        (Uint32(a), Uint32(b)) => a == b,
        (Int64(a), Int64(b)) => a == b,
        (Uint64(a), Uint64(b)) => a == b,
        (Double(a), Double(b)) => a == b,
        (Str(a), Str(b)) => a == b,
        (ObjectPath(a), ObjectPath(b)) => a == b,
        (Signature(a), Signature(b)) => a == b,
        (Handle(a), Handle(b)) => a == b,
        (Maybe(ta, a), Maybe(tb, b)) => ta == tb && a == b,
        (Array(ta, a), Array(tb, b)) => ta == tb && a == b,
        (Struct(a), Struct(b)) => a == b,
        (Dict(ka, va, a), Dict(kb, vb, b)) => ka == kb && va == vb && a == b,
        (Variant(a), Variant(b)) => a == b,
        _ => false,
    }
}

impl PartialOrd for Value {
    /// Ordering is defined only over basic types.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use ValueKind::*;
        match (&self.kind, &other.kind) {
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (Byte(a), Byte(b)) => a.partial_cmp(b),
            (Int16(a), Int16(b)) => a.partial_cmp(b),
            (Uint16(a), Uint16(b)) => a.partial_cmp(b),
            (Int32(a), Int32(b)) => a.partial_cmp(b),
            (Uint32(a), Uint32(b)) => a.partial_cmp(b),
            (Int64(a), Int64(b)) => a.partial_cmp(b),
            (Uint64(a), Uint64(b)) => a.partial_cmp(b),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (Str(a), Str(b)) => a.partial_cmp(b),
            (ObjectPath(a), ObjectPath(b)) => a.partial_cmp(b),
            (Handle(a), Handle(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self)
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, v: &Value) -> fmt::Result {
    match &v.kind {
        ValueKind::Bool(b) => write!(f, "{b}"),
        ValueKind::Byte(b) => write!(f, "byte {b:#04x}"),
        ValueKind::Int16(n) => write!(f, "int16 {n}"),
        ValueKind::Uint16(n) => write!(f, "uint16 {n}"),
        ValueKind::Int32(n) => write!(f, "{n}"),
        ValueKind::Uint32(n) => write!(f, "uint32 {n}"),
        ValueKind::Int64(n) => write!(f, "int64 {n}"),
        ValueKind::Uint64(n) => write!(f, "uint64 {n}"),
        ValueKind::Handle(n) => write!(f, "handle {n}"),
        ValueKind::Double(d) => write_double(f, *d),
        ValueKind::Str(s) => write_quoted_string(f, s),
        ValueKind::ObjectPath(p) => write!(f, "objectpath '{p}'"),
        ValueKind::Signature(s) => write!(f, "signature '{s}'"),
        ValueKind::Maybe(_, v) => write_maybe(f, v.as_deref()),
        ValueKind::Array(Signature::Byte, items) => write_byte_array(f, items),
        ValueKind::Array(_, items) => write_array(f, items),
        ValueKind::Struct(fields) => write_struct(f, fields),
        ValueKind::Dict(_, _, entries) => write_dict(f, entries),
        ValueKind::Variant(inner) => write_variant(f, inner),
    }
}

fn write_double(f: &mut fmt::Formatter<'_>, d: f64) -> fmt::Result {
    let s = format!("{d}");
    if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
        write!(f, "{s}")
    } else {
        write!(f, "{s}.0")
    }
}

fn write_quoted_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    let quote = if s.contains('\'') { '"' } else { '\'' };
    write!(f, "{quote}")?;
    for c in s.chars() {
        match c {
            '\x07' => write!(f, "\\a")?,
            '\x08' => write!(f, "\\b")?,
            '\x0c' => write!(f, "\\f")?,
            '\n' => write!(f, "\\n")?,
            '\r' => write!(f, "\\r")?,
            '\t' => write!(f, "\\t")?,
            '\x0b' => write!(f, "\\v")?,
            c if c == quote || c == '\\' => write!(f, "\\{c}")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04X}", c as u32)?,
            c if (c as u32) > 0x10FFFF => write!(f, "\\U{:08X}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "{quote}")
}

fn write_byte_array(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    let nul_count = items
        .iter()
        .filter(|v| matches!(v.kind, ValueKind::Byte(0)))
        .count();
    let ends_in_one_nul = nul_count == 1
        && matches!(items.last().map(|v| &v.kind), Some(ValueKind::Byte(0)));
    if ends_in_one_nul {
        write!(f, "b'")?;
        for v in &items[..items.len() - 1] {
            if let ValueKind::Byte(b) = v.kind {
                match b {
                    b'\\' | b'\'' => write!(f, "\\{}", b as char)?,
                    0x20..=0x7e => write!(f, "{}", b as char)?,
                    _ => write!(f, "\\x{b:02x}")?,
                }
            }
        }
        write!(f, "'")
    } else {
        write_array(f, items)
    }
}

fn write_array(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    write!(f, "[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, "]")
}

fn write_struct(f: &mut fmt::Formatter<'_>, fields: &[Value]) -> fmt::Result {
    if fields.is_empty() {
        return write!(f, "()");
    }
    write!(f, "(")?;
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{field},")?;
    }
    write!(f, ")")
}

fn write_dict(f: &mut fmt::Formatter<'_>, entries: &[(Value, Value)]) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (k, v)) in entries.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{k}: {v}")?;
    }
    write!(f, "}}")
}

fn write_maybe(f: &mut fmt::Formatter<'_>, v: Option<&Value>) -> fmt::Result {
    match v {
        None => write!(f, "nothing"),
        Some(v) => {
            let inner = v.to_string();
            if inner == "nothing" {
                write!(f, "just {inner}")
            } else {
                write!(f, "{inner}")
            }
        }
    }
}

fn write_variant(f: &mut fmt::Formatter<'_>, inner: &Value) -> fmt::Result {
    let text = inner.to_string();
    let needs_annotation = text == "nothing" || text == "[]";
    if needs_annotation {
        write!(f, "<@{} {}>", inner.value_signature(), text)
    } else {
        write!(f, "<{text}>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byteswap_involution() {
        let v = Value::uint32(0x0102_0304);
        let swapped = v.byteswap();
        assert_eq!(swapped.as_u32(), Some(0x0403_0201));
        assert_eq!(swapped.byteswap(), v);
    }

    #[test]
    fn byteswap_noop_for_byte_only_types() {
        let v = Value::string("hi");
        assert_eq!(v.byteswap(), v);
    }

    #[test]
    fn normal_form_idempotent() {
        let v = Value::int32(42);
        let nf = v.get_normal_form();
        assert!(nf.is_trusted());
        assert_eq!(nf.get_normal_form(), nf);
    }

    #[test]
    fn display_examples() {
        assert_eq!(Value::int32(500).to_string(), "500");
        assert_eq!(Value::byte(0x2a).to_string(), "byte 0x2a");
        assert_eq!(Value::uint16(7).to_string(), "uint16 7");
        let nothing = Value::nothing(Signature::String);
        assert_eq!(Value::variant(nothing).to_string(), "<@ms nothing>");
        assert_eq!(Value::variant(Value::int32(500)).to_string(), "<500>");
    }

    #[test]
    fn equality_holds_for_dict() {
        let mut entries = Vec::new();
        entries.push((
            Value::string("width"),
            Value::variant(Value::int32(500)),
        ));
        entries.push((
            Value::string("title"),
            Value::variant(Value::nothing(Signature::String)),
        ));
        let d1 = Value::new(ValueKind::Dict(Signature::String, Signature::Variant, entries.clone()));
        let d2 = Value::new(ValueKind::Dict(Signature::String, Signature::Variant, entries));
        assert_eq!(d1, d2);
    }
}
