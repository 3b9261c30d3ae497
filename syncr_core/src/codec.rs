//! The canonical binary dictionary format used for every wire and
//! on-disk record (spec.md section 4.2).
//!
//! This is a small bencode-shaped encoding: byte-strings, integers, ordered
//! lists, and nested maps with byte-string keys. It must be bijective —
//! `decode(encode(x)) == x`, and re-encoding a decoded value reproduces the
//! exact original bytes — because the drop metadata header signature is
//! computed over these bytes (spec.md section 9: "Canonical encoding is
//! load-bearing for signatures"). Map keys are kept in a `BTreeMap<Vec<u8>,
//! _>`, which already sorts by byte value, so there is only one way to
//! encode any given map.
//!
//! Grounded on `original_source`'s use of a bencode library for this same
//! purpose; adapted here as a small hand-rolled cursor-based parser (no
//! serde derive) since bijectivity rules out a generic encoder, the same
//! way the teacher hand-rolls `StreamMessage::serialize`/`deserialize`
//! rather than deriving it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// A value in the canonical dictionary format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Int(i64),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input")]
    Eof,
    #[error("invalid integer literal")]
    InvalidInt,
    #[error("invalid length prefix")]
    InvalidLength,
    #[error("unknown value tag byte {0:#x}")]
    UnknownTag(u8),
    #[error("dict keys out of order or duplicated")]
    UnsortedKeys,
    #[error("trailing bytes after value")]
    TrailingBytes,
}

type Result<T> = std::result::Result<T, CodecError>;

impl Value {
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(b.into())
    }

    pub fn int(i: i64) -> Self {
        Value::Int(i)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Encodes this value to its canonical byte representation.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Value::Bytes(b) => {
                buf.put_slice(b.len().to_string().as_bytes());
                buf.put_u8(b':');
                buf.put_slice(b);
            }
            Value::Int(i) => {
                buf.put_u8(b'i');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_u8(b'e');
            }
            Value::List(items) => {
                buf.put_u8(b'l');
                for item in items {
                    item.encode_into(buf);
                }
                buf.put_u8(b'e');
            }
            Value::Dict(map) => {
                buf.put_u8(b'd');
                for (k, v) in map {
                    Value::Bytes(k.clone()).encode_into(buf);
                    v.encode_into(buf);
                }
                buf.put_u8(b'e');
            }
        }
    }

    /// Decodes a single canonical value from `bytes`, requiring that the
    /// entire input is consumed (no trailing garbage).
    pub fn decode(bytes: &[u8]) -> Result<Value> {
        let mut cursor = bytes;
        let value = Value::decode_one(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(value)
    }

    fn decode_one(cursor: &mut &[u8]) -> Result<Value> {
        match cursor.first().copied().ok_or(CodecError::Eof)? {
            b'i' => {
                cursor.advance(1);
                let end = find(cursor, b'e')?;
                let s =
                    std::str::from_utf8(&cursor[..end]).map_err(|_| CodecError::InvalidInt)?;
                let i: i64 = s.parse().map_err(|_| CodecError::InvalidInt)?;
                // Canonical form has no leading zeros (other than "0" itself) and no "-0".
                if s != i.to_string() {
                    return Err(CodecError::InvalidInt);
                }
                cursor.advance(end + 1);
                Ok(Value::Int(i))
            }
            b'l' => {
                cursor.advance(1);
                let mut items = Vec::new();
                while cursor.first() != Some(&b'e') {
                    items.push(Value::decode_one(cursor)?);
                }
                cursor.advance(1);
                Ok(Value::List(items))
            }
            b'd' => {
                cursor.advance(1);
                let mut map = BTreeMap::new();
                let mut last_key: Option<Vec<u8>> = None;
                while cursor.first() != Some(&b'e') {
                    let key = match Value::decode_one(cursor)? {
                        Value::Bytes(b) => b,
                        _ => return Err(CodecError::InvalidLength),
                    };
                    if let Some(last) = &last_key
                        && key <= *last
                    {
                        return Err(CodecError::UnsortedKeys);
                    }
                    let value = Value::decode_one(cursor)?;
                    last_key = Some(key.clone());
                    map.insert(key, value);
                }
                cursor.advance(1);
                Ok(Value::Dict(map))
            }
            b'0'..=b'9' => {
                let colon = find(cursor, b':')?;
                let len_str =
                    std::str::from_utf8(&cursor[..colon]).map_err(|_| CodecError::InvalidLength)?;
                let len: usize = len_str.parse().map_err(|_| CodecError::InvalidLength)?;
                if len_str != len.to_string() {
                    return Err(CodecError::InvalidLength);
                }
                let start = colon + 1;
                let end = start
                    .checked_add(len)
                    .ok_or(CodecError::InvalidLength)?;
                if end > cursor.len() {
                    return Err(CodecError::Eof);
                }
                let out = cursor[start..end].to_vec();
                cursor.advance(end);
                Ok(Value::Bytes(out))
            }
            tag => Err(CodecError::UnknownTag(tag)),
        }
    }
}

fn find(haystack: &[u8], needle: u8) -> Result<usize> {
    haystack
        .iter()
        .position(|&b| b == needle)
        .ok_or(CodecError::Eof)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_scalar_values() {
        for v in [Value::int(0), Value::int(-7), Value::int(123456)] {
            assert_eq!(Value::decode(&v.encode()).unwrap(), v);
        }
        let s = Value::bytes(b"hello world".to_vec());
        assert_eq!(Value::decode(&s.encode()).unwrap(), s);
    }

    #[test]
    fn roundtrip_nested_structure() {
        let mut dict = BTreeMap::new();
        dict.insert(b"a".to_vec(), Value::int(1));
        dict.insert(b"b".to_vec(), Value::List(vec![Value::bytes(b"x".to_vec()), Value::int(2)]));
        let v = Value::Dict(dict);
        let encoded = v.encode();
        let decoded = Value::decode(&encoded).unwrap();
        assert_eq!(decoded, v);
        // Bijectivity: re-encoding the decoded value reproduces the exact bytes.
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn dict_key_order_is_independent_of_insertion_order() {
        let mut d1 = BTreeMap::new();
        d1.insert(b"z".to_vec(), Value::int(1));
        d1.insert(b"a".to_vec(), Value::int(2));

        let mut d2 = BTreeMap::new();
        d2.insert(b"a".to_vec(), Value::int(2));
        d2.insert(b"z".to_vec(), Value::int(1));

        assert_eq!(Value::Dict(d1).encode(), Value::Dict(d2).encode());
    }

    #[test]
    fn rejects_unsorted_dict_keys() {
        // Hand-crafted bytes with keys out of order: d1:z i1e 1:a i2e e
        let bytes = b"d1:zi1e1:ai2ee";
        assert_eq!(Value::decode(bytes), Err(CodecError::UnsortedKeys));
    }

    #[test]
    fn rejects_leading_zero_integers() {
        assert_eq!(Value::decode(b"i04e"), Err(CodecError::InvalidInt));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let v = Value::int(1);
        let mut encoded = v.encode().to_vec();
        encoded.push(b'x');
        assert_eq!(Value::decode(&encoded), Err(CodecError::TrailingBytes));
    }

    #[test]
    fn empty_dict_roundtrip() {
        let v = Value::Dict(BTreeMap::new());
        assert_eq!(v.encode().as_ref(), b"de");
        assert_eq!(Value::decode(&v.encode()).unwrap(), v);
    }
}
