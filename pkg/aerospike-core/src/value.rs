//! The bin value ("particle") tagged union (spec §3).

use byteorder::{BigEndian, ReadBytesExt};

use crate::errors::ResultCode;
use crate::msgpack::{Decoder, Encoder, MapOrder};
use crate::particle_type;

/// A single bin's value. `List`/`Map` carry their msgpack-decoded tree
/// rather than raw bytes — callers that only need the byte form (the
/// `deserialize=false` mode spec §4.A describes) should read the op's raw
/// value slice directly instead of going through `Value`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Blob(Vec<u8>),
    GeoJson(String),
    List(Vec<Value>),
    Map(MapOrder, Vec<(Value, Value)>),
    Hll(Vec<u8>),
    /// Used only inside CDT context / filter expressions; never a bin's own
    /// type.
    Wildcard,
    /// Used only inside filter expressions (comparisons against "infinity").
    Infinity,
}

impl Value {
    /// The particle type byte this value serializes as at the bin level
    /// (spec §3, §4.A).
    pub fn particle_type(&self) -> u8 {
        match self {
            Value::Nil => particle_type::NULL,
            Value::Int(_) => particle_type::INTEGER,
            Value::Float(_) => particle_type::FLOAT,
            Value::Bool(_) => particle_type::BOOL,
            Value::String(_) => particle_type::STRING,
            Value::Blob(_) => particle_type::BLOB,
            Value::GeoJson(_) => particle_type::GEOJSON,
            Value::List(_) => particle_type::LIST,
            Value::Map(..) => particle_type::MAP,
            Value::Hll(_) => particle_type::HLL,
            Value::Wildcard => particle_type::WILDCARD,
            Value::Infinity => particle_type::NULL,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The on-wire op value bytes for this particle (spec §4.A "Operations":
    /// `value[remainder]`). Lists and maps fall back to their own msgpack
    /// encoding, the same one `crate::msgpack::Encoder` produces for CDT
    /// arguments.
    pub fn encode_particle(&self) -> Vec<u8> {
        match self {
            Value::Nil | Value::Wildcard | Value::Infinity => vec![],
            Value::Int(i) => i.to_be_bytes().to_vec(),
            Value::Float(f) => f.to_be_bytes().to_vec(),
            Value::Bool(b) => vec![if *b { 1 } else { 0 }],
            Value::String(s) => s.as_bytes().to_vec(),
            Value::Blob(b) => b.clone(),
            Value::GeoJson(s) => s.as_bytes().to_vec(),
            Value::Hll(b) => b.clone(),
            Value::List(_) | Value::Map(..) => {
                let mut enc = Encoder::new();
                enc.write_value(self);
                enc.into_bytes()
            }
        }
    }

    /// Inverse of [`Value::encode_particle`], keyed by the wire's
    /// `particle_type` byte (spec §4.A "Parser contract": "materializes...
    /// a particle according to particle_type").
    pub fn decode_particle(particle_type: u8, bytes: &[u8]) -> Result<Value, ResultCode> {
        Ok(match particle_type {
            particle_type::NULL => Value::Nil,
            particle_type::INTEGER => {
                let mut buf = [0u8; 8];
                if bytes.len() > 8 {
                    return Err(ResultCode::Protocol("integer particle wider than 8 bytes".into()));
                }
                buf[8 - bytes.len()..].copy_from_slice(bytes);
                Value::Int(i64::from_be_bytes(buf))
            }
            particle_type::FLOAT => {
                Value::Float((&mut &bytes[..]).read_f64::<BigEndian>().map_err(|e| ResultCode::Protocol(e.to_string()))?)
            }
            particle_type::BOOL => Value::Bool(bytes.first().copied().unwrap_or(0) != 0),
            particle_type::STRING => Value::String(
                std::str::from_utf8(bytes)
                    .map_err(|e| ResultCode::Protocol(e.to_string()))?
                    .to_string(),
            ),
            particle_type::GEOJSON => Value::GeoJson(
                std::str::from_utf8(bytes)
                    .map_err(|e| ResultCode::Protocol(e.to_string()))?
                    .to_string(),
            ),
            particle_type::LIST | particle_type::MAP => {
                let mut dec = Decoder::new(bytes);
                let value = dec.read_value()?;
                if dec.remaining() != 0 {
                    return Err(ResultCode::Protocol("trailing bytes after particle value".into()));
                }
                value
            }
            particle_type::HLL => Value::Hll(bytes.to_vec()),
            particle_type::BLOB
            | particle_type::JAVA_BLOB
            | particle_type::CSHARP_BLOB
            | particle_type::PYTHON_BLOB
            | particle_type::PHP_BLOB
            | particle_type::ERLANG_BLOB => Value::Blob(bytes.to_vec()),
            other => return Err(ResultCode::Protocol(format!("unknown particle type {}", other))),
        })
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) -> Value {
        let bytes = v.encode_particle();
        Value::decode_particle(v.particle_type(), &bytes).unwrap()
    }

    #[test]
    fn particle_round_trips_scalars() {
        assert_eq!(round_trip(Value::Int(123)), Value::Int(123));
        assert_eq!(round_trip(Value::Int(-1)), Value::Int(-1));
        assert_eq!(round_trip(Value::Float(1.5)), Value::Float(1.5));
        assert_eq!(round_trip(Value::Bool(true)), Value::Bool(true));
        assert_eq!(round_trip(Value::String("abc".into())), Value::String("abc".into()));
        assert_eq!(round_trip(Value::Blob(vec![1, 2, 3])), Value::Blob(vec![1, 2, 3]));
    }

    #[test]
    fn particle_round_trips_list() {
        let v = Value::List(vec![Value::Int(1), Value::String("x".into())]);
        assert_eq!(round_trip(v.clone()), v);
    }

    #[test]
    fn decode_particle_rejects_unknown_type() {
        assert!(Value::decode_particle(250, &[]).is_err());
    }

    #[test]
    fn decode_particle_rejects_trailing_bytes() {
        let v = Value::List(vec![Value::Int(1)]);
        let mut bytes = v.encode_particle();
        bytes.push(0xc0);
        assert!(Value::decode_particle(particle_type::LIST, &bytes).is_err());
    }
}
