//! The info sub-protocol: a `\n`-separated request for named commands,
//! answered with `\n`-separated `name\tvalue` pairs (spec §6).
//!
//! Grounded on `src/test/util/info_helper.c`'s role in `original_source/`
//! (SPEC_FULL §10): a small key/value accessor layered over the raw
//! request/response, used by both the tender and any ad-hoc info caller.

use std::collections::HashMap;
use std::io::{Read, Write};

use crate::errors::ResultCode;
use crate::proto::header::{self, ProtoHeader};

/// Builds the raw bytes of an info request for the given `\n`-joined
/// command names, framed with an 8-byte proto header of type `info`.
pub fn build_request(commands: &[&str]) -> Vec<u8> {
    let mut body = commands.join("\n");
    if !commands.is_empty() {
        body.push('\n');
    }

    let proto = ProtoHeader::new(header::TYPE_INFO, body.len() as u64);
    let mut out = Vec::with_capacity(header::HEADER_SIZE + body.len());
    out.extend_from_slice(&proto.to_bytes());
    out.extend_from_slice(body.as_bytes());
    out
}

/// Writes an info request and reads back the framed response body as raw
/// bytes. Separated from `InfoResponse::parse` so callers that only need
/// one command's value (e.g. the tender's `node` probe) need not allocate a
/// map.
pub fn request(stream: &mut (impl Read + Write), commands: &[&str]) -> Result<Vec<u8>, ResultCode> {
    stream
        .write_all(&build_request(commands))
        .map_err(ResultCode::from)?;

    let proto = ProtoHeader::read_from(stream)?;
    if proto.proto_type != header::TYPE_INFO {
        return Err(ResultCode::Protocol(format!(
            "expected an info proto type, got {}",
            proto.proto_type
        )));
    }

    let mut body = vec![0u8; proto.size as usize];
    stream.read_exact(&mut body).map_err(ResultCode::from)?;
    Ok(body)
}

/// A parsed info response: `name1\tvalue1\nname2\tvalue2\n…` (spec §6).
#[derive(Debug, Clone, Default)]
pub struct InfoResponse {
    values: HashMap<String, String>,
}

impl InfoResponse {
    pub fn parse(body: &[u8]) -> Result<Self, ResultCode> {
        let text = std::str::from_utf8(body)
            .map_err(|e| ResultCode::Protocol(format!("non-utf8 info response: {}", e)))?;

        let mut values = HashMap::new();
        for line in text.split('\n') {
            if line.is_empty() {
                continue;
            }
            match line.split_once('\t') {
                Some((name, value)) => {
                    values.insert(name.to_string(), value.to_string());
                }
                None => {
                    // A command with no reply value (e.g. an unrecognized
                    // one some server versions echo bare) — keep the name
                    // mapped to an empty value rather than erroring, since
                    // callers probe multiple commands at once and one
                    // missing value should not sink the whole response.
                    values.insert(line.to_string(), String::new());
                }
            }
        }

        Ok(Self { values })
    }

    /// Issues `commands` over `stream` and parses the response in one call.
    pub fn fetch(stream: &mut (impl Read + Write), commands: &[&str]) -> Result<Self, ResultCode> {
        let body = request(stream, commands)?;
        Self::parse(&body)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Splits a `;`-separated multi-field value (spec §6: "multi-field
    /// values inside a single response are `;`-separated").
    pub fn get_multi(&self, name: &str) -> Vec<&str> {
        self.get(name)
            .map(|v| v.split(';').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Splits a `namespace:base64(bitmap)` pair out of one `;`-separated
    /// element of `replicas-read`/`replicas-write` (spec §6 "Partition
    /// replicas encoding").
    pub fn split_kv(field: &str) -> Option<(&str, &str)> {
        field.split_once(':')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_framing_joins_commands_with_newlines() {
        let req = build_request(&["node", "partitions"]);
        let proto = ProtoHeader::parse(&req[0..8].try_into().unwrap()).unwrap();
        assert_eq!(proto.proto_type, header::TYPE_INFO);
        assert_eq!(&req[8..], b"node\npartitions\n");
    }

    #[test]
    fn parses_name_value_pairs() {
        let body = b"node\tBB9.foo\npartition-generation\t7\n";
        let parsed = InfoResponse::parse(body).unwrap();
        assert_eq!(parsed.get("node"), Some("BB9.foo"));
        assert_eq!(parsed.get("partition-generation"), Some("7"));
        assert_eq!(parsed.get("missing"), None);
    }

    #[test]
    fn splits_multi_field_services() {
        let body = b"services\t10.0.0.1:3000;10.0.0.2:3000\n";
        let parsed = InfoResponse::parse(body).unwrap();
        assert_eq!(parsed.get_multi("services"), vec!["10.0.0.1:3000", "10.0.0.2:3000"]);
    }

    #[test]
    fn splits_replicas_namespace_bitmap_pairs() {
        let (ns, b64) = InfoResponse::split_kv("test:AAAA").unwrap();
        assert_eq!(ns, "test");
        assert_eq!(b64, "AAAA");
    }
}
