//! The 8-byte proto header framing every message on the wire (spec §4.A).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::errors::ResultCode;

pub const VERSION: u8 = 2;

pub const TYPE_INFO: u8 = 1;
pub const TYPE_SECURITY: u8 = 2;
pub const TYPE_MESSAGE: u8 = 3;
pub const TYPE_COMPRESSED: u8 = 4;

pub const HEADER_SIZE: usize = 8;

/// The server will never legitimately send a payload anywhere near this;
/// used to reject corrupt/truncated length fields before attempting to
/// allocate a buffer for them (spec §4.A "rejects payloads whose length
/// exceeds a configured maximum").
pub const MAX_PAYLOAD_SIZE: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoHeader {
    pub version: u8,
    pub proto_type: u8,
    pub size: u64,
}

impl ProtoHeader {
    pub fn new(proto_type: u8, size: u64) -> Self {
        Self {
            version: VERSION,
            proto_type,
            size,
        }
    }

    /// Packs `version`, `type` and `size` into the single big-endian 8-byte
    /// word the wire uses: `version` occupies the top byte, `type` the next
    /// byte, and `size` the remaining 48 bits.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let word = ((self.version as u64) << 56) | ((self.proto_type as u64) << 48) | (self.size & 0x0000_ffff_ffff_ffff);
        let mut out = [0u8; HEADER_SIZE];
        (&mut out[..]).write_u64::<BigEndian>(word).unwrap();
        out
    }

    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&self.to_bytes())
    }

    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self, ResultCode> {
        let word = (&bytes[..]).read_u64::<BigEndian>().unwrap();
        let version = (word >> 56) as u8;
        let proto_type = ((word >> 48) & 0xff) as u8;
        let size = word & 0x0000_ffff_ffff_ffff;

        if version != VERSION {
            return Err(ResultCode::Protocol(format!(
                "unsupported proto version {}",
                version
            )));
        }

        if !matches!(
            proto_type,
            TYPE_INFO | TYPE_SECURITY | TYPE_MESSAGE | TYPE_COMPRESSED
        ) {
            return Err(ResultCode::Protocol(format!(
                "unrecognized proto type {}",
                proto_type
            )));
        }

        if size > MAX_PAYLOAD_SIZE {
            return Err(ResultCode::Protocol(format!(
                "proto payload of {} bytes exceeds the maximum of {}",
                size, MAX_PAYLOAD_SIZE
            )));
        }

        Ok(Self {
            version,
            proto_type,
            size,
        })
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, ResultCode> {
        let mut bytes = [0u8; HEADER_SIZE];
        r.read_exact(&mut bytes)
            .map_err(|e| ResultCode::from(e))?;
        Self::parse(&bytes)
    }
}

/// Deflates `payload` and wraps it as a `compressed` proto message: an
/// 8-byte big-endian uncompressed-size prefix followed by the zlib stream
/// (spec §4.A).
pub fn compress_payload(payload: &[u8]) -> io::Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    let mut out = Vec::with_capacity(8 + payload.len());
    out.write_u64::<BigEndian>(payload.len() as u64)?;

    let mut encoder = ZlibEncoder::new(out, Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

/// Inflates a `compressed` proto message's body back into the original
/// uncompressed payload bytes.
pub fn decompress_payload(body: &[u8]) -> Result<Vec<u8>, ResultCode> {
    use flate2::read::ZlibDecoder;

    if body.len() < 8 {
        return Err(ResultCode::Protocol("truncated compressed payload".into()));
    }

    let uncompressed_size = (&body[0..8]).read_u64::<BigEndian>().unwrap();
    if uncompressed_size > MAX_PAYLOAD_SIZE {
        return Err(ResultCode::Protocol(
            "compressed payload declares an oversized uncompressed size".into(),
        ));
    }

    let mut decoder = ZlibDecoder::new(&body[8..]);
    let mut out = Vec::with_capacity(uncompressed_size as usize);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ResultCode::from(e))?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = ProtoHeader::new(TYPE_MESSAGE, 12345);
        let bytes = h.to_bytes();
        let h2 = ProtoHeader::parse(&bytes).unwrap();
        assert_eq!(h, h2);
    }

    #[test]
    fn declared_size_matches_payload_length() {
        // spec §8: "the 8-byte proto header's declared size equals the
        // length of the payload that follows."
        let payload = vec![0xaau8; 777];
        let h = ProtoHeader::new(TYPE_MESSAGE, payload.len() as u64);
        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();
        buf.extend_from_slice(&payload);

        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&buf[..HEADER_SIZE]);
        let parsed = ProtoHeader::parse(&header_bytes).unwrap();
        assert_eq!(parsed.size as usize, buf.len() - HEADER_SIZE);
    }

    #[test]
    fn rejects_bad_version() {
        let mut bytes = ProtoHeader::new(TYPE_MESSAGE, 0).to_bytes();
        bytes[0] = 9;
        assert!(ProtoHeader::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut bytes = ProtoHeader::new(TYPE_MESSAGE, 0).to_bytes();
        // Set size field to something past MAX_PAYLOAD_SIZE.
        bytes[2] = 0xff;
        assert!(ProtoHeader::parse(&bytes).is_err());
    }

    #[test]
    fn compressed_payload_round_trips() {
        let payload = b"hello hello hello hello hello".to_vec();
        let compressed = compress_payload(&payload).unwrap();
        let decompressed = decompress_payload(&compressed).unwrap();
        assert_eq!(decompressed, payload);
    }
}
