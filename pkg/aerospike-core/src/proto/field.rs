//! `cl_msg` fields: `{ size: u32 be, type: u8, data[size-1] }` (spec §4.A).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Write;

use crate::errors::ResultCode;

pub const NAMESPACE: u8 = 0;
pub const SET_NAME: u8 = 1;
pub const KEY: u8 = 2;
pub const DIGEST_RIPE: u8 = 4;
pub const TRANSACTION_ID: u8 = 7;
pub const SCAN_OPTIONS: u8 = 8;
pub const DIGEST_ARRAY: u8 = 12;
pub const MAX_RECORDS: u8 = 13;
pub const INDEX_NAME: u8 = 21;
pub const INDEX_RANGE: u8 = 22;
pub const UDF_PACKAGE_NAME: u8 = 30;
pub const UDF_FUNCTION: u8 = 31;
pub const UDF_ARGLIST: u8 = 32;
pub const UDF_OP: u8 = 33;
pub const QUERY_BINLIST: u8 = 40;
pub const BATCH_INDEX: u8 = 41;
pub const FILTER_EXPRESSION: u8 = 43;
pub const RECORD_VERSION: u8 = 44;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub field_type: u8,
    pub data: Vec<u8>,
}

impl Field {
    pub fn new(field_type: u8, data: Vec<u8>) -> Self {
        Self { field_type, data }
    }

    pub fn string(field_type: u8, s: &str) -> Self {
        Self::new(field_type, s.as_bytes().to_vec())
    }

    /// `size` is the size of `type` + `data`, i.e. `data.len() + 1`.
    pub fn wire_len(&self) -> usize {
        4 + 1 + self.data.len()
    }

    pub fn write_to(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_u32::<BigEndian>((self.data.len() + 1) as u32)?;
        w.write_u8(self.field_type)?;
        w.write_all(&self.data)
    }

    /// Parses one field from the front of `buf`, returning it plus the
    /// number of bytes consumed.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ResultCode> {
        if buf.len() < 5 {
            return Err(ResultCode::Protocol("truncated field header".into()));
        }

        let size = (&buf[0..4]).read_u32::<BigEndian>().unwrap() as usize;
        if size == 0 {
            return Err(ResultCode::Protocol("field size must include the type byte".into()));
        }
        let field_type = buf[4];
        let data_len = size - 1;

        if buf.len() < 5 + data_len {
            return Err(ResultCode::Protocol("truncated field data".into()));
        }

        let data = buf[5..5 + data_len].to_vec();
        Ok((Self { field_type, data }, 4 + size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_round_trips() {
        let f = Field::string(NAMESPACE, "test");
        let mut buf = Vec::new();
        f.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), f.wire_len());

        let (parsed, consumed) = Field::parse(&buf).unwrap();
        assert_eq!(parsed, f);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn rejects_truncated_data() {
        let f = Field::string(SET_NAME, "kb");
        let mut buf = Vec::new();
        f.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(Field::parse(&buf).is_err());
    }
}
