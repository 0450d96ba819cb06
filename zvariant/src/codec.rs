//! Hand-rolled D-Bus-alignment wire codec for [`Value`].
//!
//! The message-frame codec (header fields, endianness mark) is treated as an external
//! collaborator; this module only has to serialize/deserialize a `Value` tree
//! consistently with itself, which [`crate::Context`]'s plain byte-order value is enough for.
//! `maybe(T)` has no standard D-Bus wire representation (it is a GVariant-only type); it is
//! encoded here as a one-byte present/absent flag followed by the element when present, which is
//! sufficient for this crate to round-trip its own values.

use crate::{Endian, Error, ObjectPath, Result, Signature, Value};

use super::endian::Context;

fn alignment_of(ty: &Signature) -> usize {
    match ty {
        Signature::Bool => 4,
        Signature::Byte => 1,
        Signature::Int16 | Signature::Uint16 => 2,
        Signature::Int32 | Signature::Uint32 | Signature::Handle => 4,
        Signature::Int64 | Signature::Uint64 | Signature::Double => 8,
        Signature::String | Signature::ObjectPath => 4,
        Signature::Signature => 1,
        Signature::Maybe(t) => alignment_of(t).max(1),
        Signature::Array(_) => 4,
        Signature::Struct(_) => 8,
        Signature::Dict { .. } => 4,
        Signature::Variant => 1,
    }
}

fn pad_to(buf: &mut Vec<u8>, alignment: usize) {
    while buf.len() % alignment != 0 {
        buf.push(0);
    }
}

fn write_u16(buf: &mut Vec<u8>, ctxt: Context, v: u16) {
    buf.extend_from_slice(&match ctxt.endian {
        Endian::Little => v.to_le_bytes(),
        Endian::Big => v.to_be_bytes(),
    });
}

fn write_u32(buf: &mut Vec<u8>, ctxt: Context, v: u32) {
    buf.extend_from_slice(&match ctxt.endian {
        Endian::Little => v.to_le_bytes(),
        Endian::Big => v.to_be_bytes(),
    });
}

fn write_u64(buf: &mut Vec<u8>, ctxt: Context, v: u64) {
    buf.extend_from_slice(&match ctxt.endian {
        Endian::Little => v.to_le_bytes(),
        Endian::Big => v.to_be_bytes(),
    });
}

/// Serialize `value` to a freshly allocated buffer using D-Bus alignment rules.
pub fn to_bytes(ctxt: Context, value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode(ctxt, value, &mut buf)?;
    Ok(buf)
}

fn encode(ctxt: Context, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let ty = value.value_signature();
    pad_to(buf, alignment_of(&ty));
    match &ty {
        Signature::Bool => write_u32(buf, ctxt, value.as_bool().unwrap() as u32),
        Signature::Byte => buf.push(value.as_byte().unwrap()),
        Signature::Int16 => write_u16(buf, ctxt, value.as_i16().unwrap() as u16),
        Signature::Uint16 => write_u16(buf, ctxt, value.as_u16().unwrap()),
        Signature::Int32 => write_u32(buf, ctxt, value.as_i32().unwrap() as u32),
        Signature::Uint32 => write_u32(buf, ctxt, value.as_u32().unwrap()),
        Signature::Handle => write_u32(buf, ctxt, value.as_handle().unwrap()),
        Signature::Int64 => write_u64(buf, ctxt, value.as_i64().unwrap() as u64),
        Signature::Uint64 => write_u64(buf, ctxt, value.as_u64().unwrap()),
        Signature::Double => write_u64(buf, ctxt, value.as_f64().unwrap().to_bits()),
        Signature::String | Signature::ObjectPath => {
            let s = value
                .as_str()
                .map(str::to_owned)
                .or_else(|| value.as_object_path().map(|p| p.as_str().to_owned()))
                .unwrap();
            write_u32(buf, ctxt, s.len() as u32);
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
        }
        Signature::Signature => {
            let s = value.as_signature().unwrap().to_string();
            buf.push(s.len() as u8);
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
        }
        Signature::Maybe(elem_ty) => match value.as_maybe().unwrap() {
            None => buf.push(0),
            Some(inner) => {
                buf.push(1);
                pad_to(buf, alignment_of(elem_ty));
                encode(ctxt, inner, buf)?;
            }
        },
        Signature::Array(elem_ty) => {
            let len_pos = buf.len();
            write_u32(buf, ctxt, 0);
            pad_to(buf, alignment_of(elem_ty));
            let start = buf.len();
            for item in value.iter() {
                encode(ctxt, item, buf)?;
            }
            let len = (buf.len() - start) as u32;
            buf[len_pos..len_pos + 4].copy_from_slice(&match ctxt.endian {
                Endian::Little => len.to_le_bytes(),
                Endian::Big => len.to_be_bytes(),
            });
        }
        Signature::Struct(_) => {
            for field in value.iter() {
                encode(ctxt, field, buf)?;
            }
        }
        Signature::Dict { .. } => {
            let len_pos = buf.len();
            write_u32(buf, ctxt, 0);
            pad_to(buf, 8);
            let start = buf.len();
            for (k, v) in value.as_dict_entries().unwrap() {
                pad_to(buf, 8);
                encode(ctxt, k, buf)?;
                encode(ctxt, v, buf)?;
            }
            let len = (buf.len() - start) as u32;
            buf[len_pos..len_pos + 4].copy_from_slice(&match ctxt.endian {
                Endian::Little => len.to_le_bytes(),
                Endian::Big => len.to_be_bytes(),
            });
        }
        Signature::Variant => {
            let inner = value.as_variant().unwrap();
            let sig_str = inner.value_signature().to_string();
            buf.push(sig_str.len() as u8);
            buf.extend_from_slice(sig_str.as_bytes());
            buf.push(0);
            encode(ctxt, inner, buf)?;
        }
    }
    Ok(())
}

/// Deserialize one value of type `ty` starting at `buf[*pos]`. If `trusted` is `false`, malformed
/// leaf values are replaced with their typed default and `*violated` is set, rather than failing
/// the whole decode (the normal-form rule); structural corruption (truncated buffers) always
/// fails regardless, since there is no valid length to skip past.
pub fn decode_at(
    ctxt: Context,
    buf: &[u8],
    pos: &mut usize,
    ty: &Signature,
    trusted: bool,
    violated: &mut bool,
) -> Result<Value> {
    align_pos(pos, alignment_of(ty));
    match ty {
        Signature::Bool => {
            let v = read_u32(buf, pos, ctxt)?;
            if v > 1 {
                if trusted {
                    return Err(Error::Message("invalid boolean value".into()));
                }
                *violated = true;
                return Ok(Value::bool(false));
            }
            Ok(Value::bool(v == 1))
        }
        Signature::Byte => Ok(Value::byte(read_u8(buf, pos)?)),
        Signature::Int16 => Ok(Value::int16(read_u16(buf, pos, ctxt)? as i16)),
        Signature::Uint16 => Ok(Value::uint16(read_u16(buf, pos, ctxt)?)),
        Signature::Int32 => Ok(Value::int32(read_u32(buf, pos, ctxt)? as i32)),
        Signature::Uint32 => Ok(Value::uint32(read_u32(buf, pos, ctxt)?)),
        Signature::Handle => Ok(Value::handle(read_u32(buf, pos, ctxt)?)),
        Signature::Int64 => Ok(Value::int64(read_u64(buf, pos, ctxt)? as i64)),
        Signature::Uint64 => Ok(Value::uint64(read_u64(buf, pos, ctxt)?)),
        Signature::Double => Ok(Value::double(f64::from_bits(read_u64(buf, pos, ctxt)?))),
        Signature::String => {
            let bytes = read_length_prefixed(buf, pos, ctxt, 4)?;
            match String::from_utf8(bytes) {
                Ok(s) => Ok(Value::string(s)),
                Err(_) if !trusted => {
                    *violated = true;
                    Ok(Value::string(""))
                }
                Err(e) => Err(e.into()),
            }
        }
        Signature::ObjectPath => {
            let bytes = read_length_prefixed(buf, pos, ctxt, 4)?;
            let s = String::from_utf8(bytes)?;
            match ObjectPath::try_new(s) {
                Ok(p) => Ok(Value::object_path(p)),
                Err(_) if !trusted => {
                    *violated = true;
                    Ok(Value::object_path(ObjectPath::try_new("/").unwrap()))
                }
                Err(e) => Err(e),
            }
        }
        Signature::Signature => {
            let bytes = read_length_prefixed_u8(buf, pos)?;
            let s = String::from_utf8(bytes)?;
            match Signature::from_str(&s) {
                Ok(sig) => Ok(Value::signature(sig)),
                Err(_) if !trusted => {
                    *violated = true;
                    Ok(Value::signature(Signature::Struct(vec![])))
                }
                Err(e) => Err(e),
            }
        }
        Signature::Maybe(elem_ty) => {
            let flag = read_u8(buf, pos)?;
            match flag {
                0 => Ok(Value::nothing((**elem_ty).clone())),
                1 => {
                    align_pos(pos, alignment_of(elem_ty));
                    let inner = decode_at(ctxt, buf, pos, elem_ty, trusted, violated)?;
                    Ok(Value::just(inner))
                }
                _ if !trusted => {
                    *violated = true;
                    Ok(Value::nothing((**elem_ty).clone()))
                }
                _ => Err(Error::Message("invalid maybe flag byte".into())),
            }
        }
        Signature::Array(elem_ty) => {
            let byte_len = read_u32(buf, pos, ctxt)? as usize;
            align_pos(pos, alignment_of(elem_ty));
            let end = pos
                .checked_add(byte_len)
                .filter(|e| *e <= buf.len())
                .ok_or(Error::OutOfBounds)?;
            let mut items = Vec::new();
            while *pos < end {
                items.push(decode_at(ctxt, buf, pos, elem_ty, trusted, violated)?);
            }
            Ok(Value::raw_array((**elem_ty).clone(), items))
        }
        Signature::Struct(fields) => {
            let mut values = Vec::with_capacity(fields.len());
            for field_ty in fields {
                values.push(decode_at(ctxt, buf, pos, field_ty, trusted, violated)?);
            }
            Ok(Value::raw_struct(values))
        }
        Signature::Dict { key, value } => {
            let byte_len = read_u32(buf, pos, ctxt)? as usize;
            align_pos(pos, 8);
            let end = pos
                .checked_add(byte_len)
                .filter(|e| *e <= buf.len())
                .ok_or(Error::OutOfBounds)?;
            let mut entries = Vec::new();
            while *pos < end {
                align_pos(pos, 8);
                let k = decode_at(ctxt, buf, pos, key, trusted, violated)?;
                let v = decode_at(ctxt, buf, pos, value, trusted, violated)?;
                entries.push((k, v));
            }
            Ok(Value::raw_dict((**key).clone(), (**value).clone(), entries))
        }
        Signature::Variant => {
            let sig_bytes = read_length_prefixed_u8(buf, pos)?;
            let sig_str = String::from_utf8(sig_bytes)?;
            let inner_ty = match Signature::from_str(&sig_str) {
                Ok(t) => t,
                Err(_) if !trusted => {
                    *violated = true;
                    return Ok(Value::variant(Value::string("")));
                }
                Err(e) => return Err(e),
            };
            align_pos(pos, alignment_of(&inner_ty));
            let inner = decode_at(ctxt, buf, pos, &inner_ty, trusted, violated)?;
            Ok(Value::variant(inner))
        }
    }
}

/// Decode a value of the given type from the start of `buf`, returning it and the number of
/// bytes consumed.
pub fn from_bytes(ctxt: Context, buf: &[u8], ty: &Signature, trusted: bool) -> Result<(Value, usize, bool)> {
    let mut pos = 0;
    let mut violated = false;
    let value = decode_at(ctxt, buf, &mut pos, ty, trusted, &mut violated)?;
    Ok((value, pos, violated))
}

fn align_pos(pos: &mut usize, alignment: usize) {
    let rem = *pos % alignment;
    if rem != 0 {
        *pos += alignment - rem;
    }
}

fn read_u8(buf: &[u8], pos: &mut usize) -> Result<u8> {
    let b = *buf.get(*pos).ok_or(Error::OutOfBounds)?;
    *pos += 1;
    Ok(b)
}

fn read_u16(buf: &[u8], pos: &mut usize, ctxt: Context) -> Result<u16> {
    let bytes = buf.get(*pos..*pos + 2).ok_or(Error::OutOfBounds)?;
    *pos += 2;
    Ok(match ctxt.endian {
        Endian::Little => u16::from_le_bytes(bytes.try_into().unwrap()),
        Endian::Big => u16::from_be_bytes(bytes.try_into().unwrap()),
    })
}

fn read_u32(buf: &[u8], pos: &mut usize, ctxt: Context) -> Result<u32> {
    let bytes = buf.get(*pos..*pos + 4).ok_or(Error::OutOfBounds)?;
    *pos += 4;
    Ok(match ctxt.endian {
        Endian::Little => u32::from_le_bytes(bytes.try_into().unwrap()),
        Endian::Big => u32::from_be_bytes(bytes.try_into().unwrap()),
    })
}

fn read_u64(buf: &[u8], pos: &mut usize, ctxt: Context) -> Result<u64> {
    let bytes = buf.get(*pos..*pos + 8).ok_or(Error::OutOfBounds)?;
    *pos += 8;
    Ok(match ctxt.endian {
        Endian::Little => u64::from_le_bytes(bytes.try_into().unwrap()),
        Endian::Big => u64::from_be_bytes(bytes.try_into().unwrap()),
    })
}

fn read_length_prefixed(buf: &[u8], pos: &mut usize, ctxt: Context, len_align: usize) -> Result<Vec<u8>> {
    align_pos(pos, len_align);
    let len = read_u32(buf, pos, ctxt)? as usize;
    let bytes = buf.get(*pos..*pos + len).ok_or(Error::OutOfBounds)?.to_vec();
    *pos += len + 1; // + nul terminator
    Ok(bytes)
}

fn read_length_prefixed_u8(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let len = read_u8(buf, pos)? as usize;
    let bytes = buf.get(*pos..*pos + len).ok_or(Error::OutOfBounds)?.to_vec();
    *pos += len + 1;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Endian;

    #[test]
    fn round_trip_struct() {
        let ctxt = Context::new(Endian::Little);
        let mut b = crate::StructBuilder::new();
        b.append(Value::int32(42)).unwrap();
        b.append(Value::string("hello")).unwrap();
        let v = b.build().unwrap();
        let bytes = to_bytes(ctxt, &v).unwrap();
        let (decoded, len, violated) = from_bytes(ctxt, &bytes, &v.value_signature(), true).unwrap();
        assert_eq!(len, bytes.len());
        assert!(!violated);
        assert_eq!(decoded, v);
    }

    #[test]
    fn round_trip_array_of_dict() {
        let ctxt = Context::new(Endian::Big);
        let mut d = crate::DictBuilder::new();
        d.insert(Value::string("a"), Value::variant(Value::int32(1)))
            .unwrap();
        d.insert(Value::string("b"), Value::variant(Value::string("x")))
            .unwrap();
        let v = d.build().unwrap();
        let bytes = to_bytes(ctxt, &v).unwrap();
        let (decoded, _len, violated) = from_bytes(ctxt, &bytes, &v.value_signature(), true).unwrap();
        assert!(!violated);
        assert_eq!(decoded, v);
    }

    #[test]
    fn untrusted_decode_substitutes_default_for_bad_utf8() {
        let ctxt = Context::new(Endian::Little);
        let mut bytes = Vec::new();
        write_u32(&mut bytes, ctxt, 2);
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.push(0);
        let (v, len, violated) = from_bytes(ctxt, &bytes, &Signature::String, false).unwrap();
        assert!(violated);
        assert_eq!(v.as_str(), Some(""));
        assert_eq!(len, bytes.len());
    }
}
