//! `cl_msg` operations: `{ op_sz: u32 be, op: u8, particle_type: u8, version:
//! u8, name_sz: u8, name[name_sz], value[remainder] }` (spec §4.A).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Write;

use crate::errors::ResultCode;

pub const READ: u8 = 1;
pub const WRITE: u8 = 2;
pub const CDT_READ: u8 = 3;
pub const CDT_MODIFY: u8 = 4;
pub const MAP_READ: u8 = 5;
pub const MAP_MODIFY: u8 = 6;
pub const INCR: u8 = 7;
pub const EXP_READ: u8 = 8;
pub const EXP_MODIFY: u8 = 9;
pub const APPEND: u8 = 10;
pub const PREPEND: u8 = 11;
pub const TOUCH: u8 = 12;
pub const BIT_READ: u8 = 13;
pub const BIT_MODIFY: u8 = 14;
pub const DELETE: u8 = 15;
pub const HLL_READ: u8 = 16;
pub const HLL_MODIFY: u8 = 17;

#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub op: u8,
    pub particle_type: u8,
    pub name: String,
    pub value: Vec<u8>,
}

impl Op {
    pub fn new(op: u8, particle_type: u8, name: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            op,
            particle_type,
            name: name.into(),
            value,
        }
    }

    /// `op_sz` is the size of everything that follows it: `op`,
    /// `particle_type`, `version`, `name_sz`, `name`, `value`.
    pub fn wire_len(&self) -> usize {
        4 + 1 + 1 + 1 + 1 + self.name.len() + self.value.len()
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<(), ResultCode> {
        if self.name.len() > u8::MAX as usize {
            return Err(ResultCode::ParamError(format!(
                "bin name {:?} exceeds 255 bytes",
                self.name
            )));
        }

        let op_sz = 1 + 1 + 1 + 1 + self.name.len() + self.value.len();
        w.write_u32::<BigEndian>(op_sz as u32)
            .map_err(ResultCode::from)?;
        w.write_u8(self.op).map_err(ResultCode::from)?;
        w.write_u8(self.particle_type).map_err(ResultCode::from)?;
        w.write_u8(0).map_err(ResultCode::from)?; // version, always zero
        w.write_u8(self.name.len() as u8).map_err(ResultCode::from)?;
        w.write_all(self.name.as_bytes()).map_err(ResultCode::from)?;
        w.write_all(&self.value).map_err(ResultCode::from)?;
        Ok(())
    }

    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ResultCode> {
        if buf.len() < 8 {
            return Err(ResultCode::Protocol("truncated op header".into()));
        }

        let op_sz = (&buf[0..4]).read_u32::<BigEndian>().unwrap() as usize;
        if op_sz < 4 {
            return Err(ResultCode::Protocol("op size inconsistency".into()));
        }

        let op = buf[4];
        let particle_type = buf[5];
        // buf[6] is the always-zero version byte.
        let name_sz = buf[7] as usize;

        let total_after_size_field = op_sz;
        if buf.len() < 4 + total_after_size_field {
            return Err(ResultCode::Protocol("truncated op body".into()));
        }
        if total_after_size_field < 4 + name_sz {
            return Err(ResultCode::Protocol("op size inconsistency".into()));
        }

        let name_start = 8;
        let name_end = name_start + name_sz;
        let name = std::str::from_utf8(&buf[name_start..name_end])
            .map_err(|e| ResultCode::Protocol(e.to_string()))?
            .to_string();

        let value_len = total_after_size_field - 4 - name_sz;
        let value = buf[name_end..name_end + value_len].to_vec();

        Ok((
            Self {
                op,
                particle_type,
                name,
                value,
            },
            4 + op_sz,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_round_trips() {
        let op = Op::new(WRITE, crate::particle_type::INTEGER, "a", 42i64.to_be_bytes().to_vec());
        let mut buf = Vec::new();
        op.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), op.wire_len());

        let (parsed, consumed) = Op::parse(&buf).unwrap();
        assert_eq!(parsed, op);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn rejects_inconsistent_size() {
        let op = Op::new(READ, 0, "bin", vec![]);
        let mut buf = Vec::new();
        op.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(Op::parse(&buf).is_err());
    }
}
