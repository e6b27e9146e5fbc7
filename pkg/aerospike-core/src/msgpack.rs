//! Minimal MessagePack encoder/decoder.
//!
//! List and map bin values, and CDT sub-operation payloads, are msgpack on
//! the wire (spec §3, §4.A). Real clients hand-roll this rather than pull in
//! a generic msgpack crate because the protocol leans on msgpack's ext-type
//! extension (type `0xc7`) for map-ordering metadata and CDT context, which
//! generic msgpack crates do not expose in a form this codec can drive
//! directly — so this mirrors what `aerospike-client-rust`'s `msgpack`
//! module does, in this crate's own style.

use byteorder::{BigEndian, WriteBytesExt};

use crate::errors::ResultCode;
use crate::value::Value;

/// Extension type byte used for the map-ordering header (spec §3: "the map
/// encoding carries an extension header describing order").
pub const EXT_TYPE_MAP_ORDER: i8 = 0;
/// Extension type byte used for CDT context (spec §4.A).
pub const EXT_TYPE_CDT_CONTEXT: i8 = 0x40;

/// Map ordering flags carried in the extension header's single data byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOrder {
    Unordered,
    KeyOrdered,
    KeyValueOrdered,
}

impl MapOrder {
    fn flag(self) -> u8 {
        match self {
            MapOrder::Unordered => 0x00,
            MapOrder::KeyOrdered => 0x01,
            MapOrder::KeyValueOrdered => 0x03,
        }
    }

    fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0x00 => Some(MapOrder::Unordered),
            0x01 => Some(MapOrder::KeyOrdered),
            0x03 => Some(MapOrder::KeyValueOrdered),
            _ => None,
        }
    }
}

pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_nil(&mut self) {
        self.buf.push(0xc0);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(if v { 0xc3 } else { 0xc2 });
    }

    pub fn write_int(&mut self, v: i64) {
        if (0..=127).contains(&v) {
            self.buf.push(v as u8);
        } else if (-32..0).contains(&v) {
            self.buf.push((v as i8) as u8);
        } else {
            self.buf.push(0xd3);
            self.buf.write_i64::<BigEndian>(v).unwrap();
        }
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.push(0xcb);
        self.buf.write_f64::<BigEndian>(v).unwrap();
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_raw_header(0xa0, 0xd9, 0xda, 0xdb, s.len());
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write_bin(&mut self, b: &[u8]) {
        self.write_bin_header(b.len());
        self.buf.extend_from_slice(b);
    }

    pub fn write_bin_header(&mut self, len: usize) {
        if len <= 0xff {
            self.buf.push(0xc4);
            self.buf.push(len as u8);
        } else if len <= 0xffff {
            self.buf.push(0xc5);
            self.buf.write_u16::<BigEndian>(len as u16).unwrap();
        } else {
            self.buf.push(0xc6);
            self.buf.write_u32::<BigEndian>(len as u32).unwrap();
        }
    }

    pub fn write_array_header(&mut self, len: usize) {
        if len < 16 {
            self.buf.push(0x90 | (len as u8));
        } else if len <= 0xffff {
            self.buf.push(0xdc);
            self.buf.write_u16::<BigEndian>(len as u16).unwrap();
        } else {
            self.buf.push(0xdd);
            self.buf.write_u32::<BigEndian>(len as u32).unwrap();
        }
    }

    pub fn write_map_header(&mut self, len: usize) {
        if len < 16 {
            self.buf.push(0x80 | (len as u8));
        } else if len <= 0xffff {
            self.buf.push(0xde);
            self.buf.write_u16::<BigEndian>(len as u16).unwrap();
        } else {
            self.buf.push(0xdf);
            self.buf.write_u32::<BigEndian>(len as u32).unwrap();
        }
    }

    /// Writes the fixext1 extension header used for map ordering (a single
    /// data byte follows immediately).
    pub fn write_ext_map_order(&mut self, order: MapOrder) {
        self.buf.push(0xc7);
        self.buf.push(1);
        self.buf.push(EXT_TYPE_MAP_ORDER as u8);
        self.buf.push(order.flag());
    }

    /// Writes an `ext8`/`ext16`/`ext32` header (type `0xc7`/`0xc8`/`0xc9`)
    /// followed by `data` verbatim, used to wrap a CDT context path.
    pub fn write_ext(&mut self, ext_type: i8, data: &[u8]) {
        if data.len() <= 0xff {
            self.buf.push(0xc7);
            self.buf.push(data.len() as u8);
        } else if data.len() <= 0xffff {
            self.buf.push(0xc8);
            self.buf.write_u16::<BigEndian>(data.len() as u16).unwrap();
        } else {
            self.buf.push(0xc9);
            self.buf.write_u32::<BigEndian>(data.len() as u32).unwrap();
        }
        self.buf.push(ext_type as u8);
        self.buf.extend_from_slice(data);
    }

    pub fn write_value(&mut self, v: &Value) {
        match v {
            Value::Nil => self.write_nil(),
            Value::Bool(b) => self.write_bool(*b),
            Value::Int(i) => self.write_int(*i),
            Value::Float(f) => self.write_f64(*f),
            Value::String(s) => self.write_str(s),
            Value::Blob(b) => self.write_bin(b),
            Value::GeoJson(s) => {
                // GeoJSON is carried as a string prefixed by particle type
                // 23 at the bin level; inside a list/map it is just a string.
                self.write_str(s);
            }
            Value::List(items) => {
                self.write_array_header(items.len());
                for item in items {
                    self.write_value(item);
                }
            }
            Value::Map(order, entries) => {
                self.write_ext_map_order(*order);
                self.write_map_header(entries.len());
                for (k, v) in entries {
                    self.write_value(k);
                    self.write_value(v);
                }
            }
            Value::Hll(b) => self.write_bin(b),
            Value::Infinity => self.buf.push(0xc1),
            Value::Wildcard => self.buf.push(0x00),
        }
    }

    fn write_raw_header(
        &mut self,
        fixed_base: u8,
        byte_len: u8,
        u16_len: u8,
        u32_len: u8,
        len: usize,
    ) {
        if len < 32 {
            self.buf.push(fixed_base | (len as u8));
        } else if len <= 0xff {
            self.buf.push(byte_len);
            self.buf.push(len as u8);
        } else if len <= 0xffff {
            self.buf.push(u16_len);
            self.buf.write_u16::<BigEndian>(len as u16).unwrap();
        } else {
            self.buf.push(u32_len);
            self.buf.write_u32::<BigEndian>(len as u32).unwrap();
        }
    }
}

pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn next_byte(&mut self) -> Result<u8, ResultCode> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| ResultCode::Protocol("truncated msgpack".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ResultCode> {
        if self.pos + n > self.data.len() {
            return Err(ResultCode::Protocol("truncated msgpack".into()));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn read_len(&mut self, b: u8) -> Result<usize, ResultCode> {
        use byteorder::ReadBytesExt;
        let len = match b {
            0xc4 | 0xd9 => self.next_byte()? as usize,
            0xc5 | 0xda => (&mut self.take(2)?).read_u16::<BigEndian>().unwrap() as usize,
            0xc6 | 0xdb => (&mut self.take(4)?).read_u32::<BigEndian>().unwrap() as usize,
            _ => return Err(ResultCode::Protocol("bad length marker".into())),
        };
        Ok(len)
    }

    /// Reads one complete msgpack value and returns it as our bin `Value`.
    pub fn read_value(&mut self) -> Result<Value, ResultCode> {
        use byteorder::ReadBytesExt;

        let b = self.next_byte()?;
        Ok(match b {
            0xc0 => Value::Nil,
            0xc1 => Value::Infinity,
            0xc2 => Value::Bool(false),
            0xc3 => Value::Bool(true),
            0xcb => {
                let v = (&mut self.take(8)?).read_f64::<BigEndian>().unwrap();
                Value::Float(v)
            }
            0xd3 => {
                let v = (&mut self.take(8)?).read_i64::<BigEndian>().unwrap();
                Value::Int(v)
            }
            0xcc => Value::Int(self.next_byte()? as i64),
            0xcd => Value::Int((&mut self.take(2)?).read_u16::<BigEndian>().unwrap() as i64),
            0xce => Value::Int((&mut self.take(4)?).read_u32::<BigEndian>().unwrap() as i64),
            0xcf => Value::Int((&mut self.take(8)?).read_u64::<BigEndian>().unwrap() as i64),
            0xd0 => Value::Int(self.next_byte()? as i8 as i64),
            0xd1 => Value::Int((&mut self.take(2)?).read_i16::<BigEndian>().unwrap() as i64),
            0xd2 => Value::Int((&mut self.take(4)?).read_i32::<BigEndian>().unwrap() as i64),
            0xc4 | 0xc5 | 0xc6 => {
                let len = self.read_len(b)?;
                Value::Blob(self.take(len)?.to_vec())
            }
            0xa0..=0xbf => {
                let len = (b & 0x1f) as usize;
                Value::String(
                    std::str::from_utf8(self.take(len)?)
                        .map_err(|e| ResultCode::Protocol(e.to_string()))?
                        .to_string(),
                )
            }
            0xd9 | 0xda | 0xdb => {
                let len = self.read_len(b)?;
                Value::String(
                    std::str::from_utf8(self.take(len)?)
                        .map_err(|e| ResultCode::Protocol(e.to_string()))?
                        .to_string(),
                )
            }
            0x00..=0x7f => Value::Int(b as i64),
            0xe0..=0xff => Value::Int((b as i8) as i64),
            0x90..=0x9f => self.read_array(((b & 0x0f) as usize))?,
            0xdc | 0xdd => {
                let len = if b == 0xdc {
                    (&mut self.take(2)?).read_u16::<BigEndian>().unwrap() as usize
                } else {
                    (&mut self.take(4)?).read_u32::<BigEndian>().unwrap() as usize
                };
                self.read_array(len)?
            }
            0x80..=0x8f => self.read_map((b & 0x0f) as usize, MapOrder::Unordered)?,
            0xde | 0xdf => {
                let len = if b == 0xde {
                    (&mut self.take(2)?).read_u16::<BigEndian>().unwrap() as usize
                } else {
                    (&mut self.take(4)?).read_u32::<BigEndian>().unwrap() as usize
                };
                self.read_map(len, MapOrder::Unordered)?
            }
            0xc7 => {
                // fixext8: { len: u8, ext_type: i8, data... }
                let len = self.next_byte()? as usize;
                let ext_type = self.next_byte()? as i8;
                let data = self.take(len)?;
                if ext_type == EXT_TYPE_MAP_ORDER && !data.is_empty() {
                    let order = MapOrder::from_flag(data[0])
                        .ok_or_else(|| ResultCode::Protocol("bad map order flag".into()))?;
                    let header = self.next_byte()?;
                    let map_len = match header {
                        0x80..=0x8f => (header & 0x0f) as usize,
                        0xde => (&mut self.take(2)?).read_u16::<BigEndian>().unwrap() as usize,
                        0xdf => (&mut self.take(4)?).read_u32::<BigEndian>().unwrap() as usize,
                        _ => {
                            return Err(ResultCode::Protocol(
                                "map order extension not followed by a map".into(),
                            ))
                        }
                    };
                    self.read_map(map_len, order)?
                } else {
                    return Err(ResultCode::Protocol("unsupported msgpack extension".into()));
                }
            }
            other => {
                return Err(ResultCode::Protocol(format!(
                    "unsupported msgpack tag 0x{:02x}",
                    other
                )))
            }
        })
    }

    fn read_array(&mut self, len: usize) -> Result<Value, ResultCode> {
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_value()?);
        }
        Ok(Value::List(items))
    }

    fn read_map(&mut self, len: usize, order: MapOrder) -> Result<Value, ResultCode> {
        let mut entries = Vec::with_capacity(len);
        let mut prev_key: Option<Value> = None;
        for _ in 0..len {
            let k = self.read_value()?;
            let v = self.read_value()?;

            // spec §4.A "map self-correction": a key-ordered map whose
            // entries are not actually sorted must be rejected on read.
            if order == MapOrder::KeyOrdered || order == MapOrder::KeyValueOrdered {
                if let Some(prev) = &prev_key {
                    if value_cmp(prev, &k) == std::cmp::Ordering::Greater {
                        return Err(ResultCode::Protocol(
                            "key-ordered map is not actually sorted".into(),
                        ));
                    }
                }
                prev_key = Some(k.clone());
            }

            entries.push((k, v));
        }

        // Any extra trailing bytes after the declared map content belong to
        // the caller (e.g. the next op), not this decoder — so we simply
        // stop here. Over-packed small integers (e.g. 0xd3 for a value that
        // would fit in a fixint) are tolerated because `read_value` already
        // accepts any valid encoding regardless of whether it is minimal.
        Ok(Value::Map(order, entries))
    }
}

fn value_cmp(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Blob(x), Value::Blob(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) -> Value {
        let mut enc = Encoder::new();
        enc.write_value(&v);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        dec.read_value().unwrap()
    }

    #[test]
    fn round_trips_scalars() {
        assert_eq!(round_trip(Value::Int(0)), Value::Int(0));
        assert_eq!(round_trip(Value::Int(-1)), Value::Int(-1));
        assert_eq!(round_trip(Value::Int(123456789)), Value::Int(123456789));
        assert_eq!(round_trip(Value::Bool(true)), Value::Bool(true));
        assert_eq!(
            round_trip(Value::String("abc".into())),
            Value::String("abc".into())
        );
        assert_eq!(round_trip(Value::Blob(vec![1, 2, 3])), Value::Blob(vec![1, 2, 3]));
    }

    #[test]
    fn round_trips_list() {
        let v = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(round_trip(v.clone()), v);
    }

    #[test]
    fn rejects_unsorted_key_ordered_map() {
        let mut enc = Encoder::new();
        enc.write_ext_map_order(MapOrder::KeyOrdered);
        enc.write_map_header(2);
        enc.write_str("b");
        enc.write_int(1);
        enc.write_str("a");
        enc.write_int(2);
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        assert!(dec.read_value().is_err());
    }

    #[test]
    fn map_put_items_with_key_ordering_is_retrievable_in_sorted_order() {
        // Mirrors the end-to-end "map put_items with ordering" scenario in
        // spec §8: build a key-ordered map and confirm the decoded entries
        // come back sorted by key.
        let mut entries = vec![
            (Value::String("Jim".into()), Value::Int(98)),
            (Value::String("Charlie".into()), Value::Int(55)),
            (Value::String("John".into()), Value::Int(76)),
            (Value::String("Harry".into()), Value::Int(82)),
        ];
        entries.sort_by(|a, b| value_cmp(&a.0, &b.0));

        let mut enc = Encoder::new();
        enc.write_ext_map_order(MapOrder::KeyOrdered);
        enc.write_map_header(entries.len());
        for (k, v) in &entries {
            enc.write_value(k);
            enc.write_value(v);
        }
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        let decoded = dec.read_value().unwrap();
        match decoded {
            Value::Map(MapOrder::KeyOrdered, got) => {
                let keys: Vec<_> = got.iter().map(|(k, _)| k.clone()).collect();
                assert_eq!(
                    keys,
                    vec![
                        Value::String("Charlie".into()),
                        Value::String("Harry".into()),
                        Value::String("Jim".into()),
                        Value::String("John".into()),
                    ]
                );
            }
            _ => panic!("expected a key-ordered map"),
        }
    }
}
