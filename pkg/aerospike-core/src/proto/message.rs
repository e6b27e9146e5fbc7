//! The `cl_msg` payload: a 22-byte header followed by length-tagged fields
//! and operations (spec §4.A).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use super::field::Field;
use super::header::{self, ProtoHeader};
use super::op::Op;
use crate::errors::ResultCode;

pub const HEADER_SIZE: usize = 22;

pub mod info1 {
    pub const READ: u8 = 1 << 0;
    pub const GET_ALL: u8 = 1 << 1;
    pub const SHORT_QUERY: u8 = 1 << 2;
    pub const BATCH: u8 = 1 << 3;
    pub const XDR: u8 = 1 << 4;
    pub const NOBINDATA: u8 = 1 << 5;
    pub const CONSISTENCY_LEVEL_ALL: u8 = 1 << 6;
    pub const COMPRESS_RESPONSE: u8 = 1 << 7;
}

pub mod info2 {
    pub const WRITE: u8 = 1 << 0;
    pub const DELETE: u8 = 1 << 1;
    pub const GENERATION: u8 = 1 << 2;
    pub const GENERATION_GT: u8 = 1 << 3;
    pub const CREATE_ONLY: u8 = 1 << 5;
    pub const REPLACE: u8 = 1 << 6;
    pub const RESPOND_ALL_OPS: u8 = 1 << 7;
}

pub mod info3 {
    pub const LAST: u8 = 1 << 0;
    pub const COMMIT_MASTER: u8 = 1 << 1;
    pub const UPDATE_ONLY: u8 = 1 << 3;
    pub const CREATE_OR_REPLACE: u8 = 1 << 4;
    pub const REPLACE_ONLY: u8 = 1 << 5;
    pub const SC_READ_TYPE: u8 = 1 << 6;
    pub const LINEARIZE_READ: u8 = 1 << 7;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgHeader {
    pub info1: u8,
    pub info2: u8,
    pub info3: u8,
    pub result_code: u8,
    pub generation: u32,
    pub record_ttl: u32,
    pub transaction_ttl: u32,
    pub n_fields: u16,
    pub n_ops: u16,
}

impl MsgHeader {
    pub fn write_to(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_u8(HEADER_SIZE as u8)?;
        w.write_u8(self.info1)?;
        w.write_u8(self.info2)?;
        w.write_u8(self.info3)?;
        w.write_u8(0)?; // padding
        w.write_u8(self.result_code)?;
        w.write_u32::<BigEndian>(self.generation)?;
        w.write_u32::<BigEndian>(self.record_ttl)?;
        w.write_u32::<BigEndian>(self.transaction_ttl)?;
        w.write_u16::<BigEndian>(self.n_fields)?;
        w.write_u16::<BigEndian>(self.n_ops)
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ResultCode> {
        if buf.len() < HEADER_SIZE {
            return Err(ResultCode::Protocol("truncated cl_msg header".into()));
        }

        let header_sz = buf[0] as usize;
        if header_sz != HEADER_SIZE {
            return Err(ResultCode::Protocol(format!(
                "unexpected cl_msg header_sz {}",
                header_sz
            )));
        }

        Ok(Self {
            info1: buf[1],
            info2: buf[2],
            info3: buf[3],
            result_code: buf[5],
            generation: (&buf[6..10]).read_u32::<BigEndian>().unwrap(),
            record_ttl: (&buf[10..14]).read_u32::<BigEndian>().unwrap(),
            transaction_ttl: (&buf[14..18]).read_u32::<BigEndian>().unwrap(),
            n_fields: (&buf[18..20]).read_u16::<BigEndian>().unwrap(),
            n_ops: (&buf[20..22]).read_u16::<BigEndian>().unwrap(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub header: MsgHeader,
    pub fields: Vec<Field>,
    pub ops: Vec<Op>,
}

impl Message {
    pub fn new(header: MsgHeader, fields: Vec<Field>, ops: Vec<Op>) -> Self {
        let mut header = header;
        header.n_fields = fields.len() as u16;
        header.n_ops = ops.len() as u16;
        Self {
            header,
            fields,
            ops,
        }
    }

    /// The 22-byte header plus all fields and ops, with no proto framing.
    pub fn encode_payload(&self) -> Result<Vec<u8>, ResultCode> {
        let mut buf = Vec::new();
        self.header.write_to(&mut buf).map_err(ResultCode::from)?;
        for field in &self.fields {
            field.write_to(&mut buf).map_err(ResultCode::from)?;
        }
        for op in &self.ops {
            op.write_to(&mut buf)?;
        }
        Ok(buf)
    }

    /// Wraps `encode_payload` in an 8-byte proto header of type `message`.
    pub fn encode_framed(&self) -> Result<Vec<u8>, ResultCode> {
        let payload = self.encode_payload()?;
        let proto = ProtoHeader::new(header::TYPE_MESSAGE, payload.len() as u64);
        let mut out = Vec::with_capacity(header::HEADER_SIZE + payload.len());
        out.extend_from_slice(&proto.to_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    pub fn parse_payload(buf: &[u8]) -> Result<Self, ResultCode> {
        let header = MsgHeader::parse(buf)?;
        let mut pos = HEADER_SIZE;

        let mut fields = Vec::with_capacity(header.n_fields as usize);
        for _ in 0..header.n_fields {
            let (field, consumed) = Field::parse(&buf[pos..])?;
            fields.push(field);
            pos += consumed;
        }

        let mut ops = Vec::with_capacity(header.n_ops as usize);
        for _ in 0..header.n_ops {
            let (op, consumed) = Op::parse(&buf[pos..])?;
            ops.push(op);
            pos += consumed;
        }

        Ok(Self {
            header,
            fields,
            ops,
        })
    }

    /// Reads one framed message off `r`, transparently inflating a
    /// `compressed` proto payload first (spec §4.A).
    pub fn read_framed(r: &mut impl Read) -> Result<Self, ResultCode> {
        let proto = ProtoHeader::read_from(r)?;

        let mut body = vec![0u8; proto.size as usize];
        r.read_exact(&mut body).map_err(ResultCode::from)?;

        let payload = match proto.proto_type {
            header::TYPE_COMPRESSED => header::decompress_payload(&body)?,
            header::TYPE_MESSAGE => body,
            other => {
                return Err(ResultCode::Protocol(format!(
                    "expected a message or compressed proto type, got {}",
                    other
                )))
            }
        };

        Self::parse_payload(&payload)
    }

    pub fn is_last(&self) -> bool {
        self.header.info3 & info3::LAST != 0
    }

    pub fn is_ok(&self) -> bool {
        self.header.result_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::field;
    use crate::proto::op;

    fn sample_message() -> Message {
        let header = MsgHeader {
            info1: info1::READ,
            generation: 7,
            record_ttl: 120,
            ..Default::default()
        };
        let fields = vec![
            Field::string(field::NAMESPACE, "test"),
            Field::string(field::SET_NAME, "kb"),
        ];
        let ops = vec![Op::new(
            op::READ,
            crate::particle_type::STRING,
            "bin1",
            vec![],
        )];
        Message::new(header, fields, ops)
    }

    #[test]
    fn payload_round_trips() {
        let msg = sample_message();
        let payload = msg.encode_payload().unwrap();
        let parsed = Message::parse_payload(&payload).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn framed_round_trips_through_a_reader() {
        let msg = sample_message();
        let framed = msg.encode_framed().unwrap();
        let mut cursor = std::io::Cursor::new(framed);
        let parsed = Message::read_framed(&mut cursor).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn declared_n_fields_and_n_ops_match_what_was_sent() {
        let msg = sample_message();
        assert_eq!(msg.header.n_fields as usize, msg.fields.len());
        assert_eq!(msg.header.n_ops as usize, msg.ops.len());
    }
}
