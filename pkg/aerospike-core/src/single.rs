//! Single-record transaction driver: read, write, operate, touch, exists,
//! delete (spec §4.G "Single-record driver").
//!
//! Each call compiles one `cl_msg`, selects one node via the partition
//! table, and makes one round-trip, retried per [`crate::command`]'s rules.

use std::sync::Arc;

use crate::cluster::Cluster;
use crate::command::{self, Outcome};
use crate::errors::ResultCode;
use crate::key::Key;
use crate::node::Node;
use crate::policy::{CommitLevel, GenerationPolicy, ReadPolicy, RecordExistsAction, WritePolicy};
use crate::proto::field::{self, Field};
use crate::proto::message::{info1, info2, info3, MsgHeader};
use crate::proto::op::Op;
use crate::proto::Message;
use crate::record::{Bin, Record};
use crate::value::Value;

fn key_fields(key: &Key) -> Vec<Field> {
    vec![
        Field::string(field::NAMESPACE, &key.namespace),
        Field::string(field::SET_NAME, &key.set_name),
        Field::new(field::DIGEST_RIPE, key.digest.to_vec()),
    ]
}

fn send_single(
    cluster: &Arc<Cluster>,
    key: &Key,
    write: bool,
    base: &crate::policy::BasePolicy,
    build: impl Fn() -> Message,
) -> Result<Message, ResultCode> {
    command::with_retries(cluster, &key.namespace, &key.digest, write, base, |node: &Arc<Node>| {
        let msg = build();
        match command::exchange(node, &msg, base.socket_timeout) {
            Ok(resp) => Outcome::Done(resp),
            Err(e) if command::is_retryable(&e) => Outcome::Retry(e),
            Err(e) => Outcome::Fatal(e),
        }
    })
}

fn parse_record(resp: &Message) -> Result<Record, ResultCode> {
    command::check_result_code(resp.header.result_code)?;
    command::decode_record(resp)
}

/// Reads a whole record, or just `bin_names` if given (spec §4.G; §8
/// scenario 1).
pub fn read(cluster: &Arc<Cluster>, policy: &ReadPolicy, key: &Key, bin_names: Option<&[&str]>) -> Result<Record, ResultCode> {
    let resp = send_single(
        cluster,
        key,
        false,
        &policy.base,
        || {
            let mut info1_bits = info1::READ;
            if bin_names.is_none() {
                info1_bits |= info1::GET_ALL;
            }
            if policy.base.consistency_level == crate::policy::ConsistencyLevel::All {
                info1_bits |= info1::CONSISTENCY_LEVEL_ALL;
            }

            let ops: Vec<Op> = bin_names
                .map(|names| names.iter().map(|n| crate::operation::get(n)).collect())
                .unwrap_or_default();

            Message::new(
                MsgHeader {
                    info1: info1_bits,
                    ..Default::default()
                },
                key_fields(key),
                ops,
            )
        },
    )?;

    parse_record(&resp)
}

/// `true` if the record exists, without transferring any bin data (spec
/// §4.A info1 `NOBINDATA`).
pub fn exists(cluster: &Arc<Cluster>, policy: &ReadPolicy, key: &Key) -> Result<bool, ResultCode> {
    let resp = send_single(
        cluster,
        key,
        false,
        &policy.base,
        || {
            Message::new(
                MsgHeader {
                    info1: info1::READ | info1::GET_ALL | info1::NOBINDATA,
                    ..Default::default()
                },
                key_fields(key),
                vec![],
            )
        },
    )?;

    match resp.header.result_code {
        0 => Ok(true),
        2 => Ok(false), // RECORD_NOT_FOUND
        other => Err(ResultCode::from_wire(other)),
    }
}

fn write_info2(policy: &WritePolicy) -> (u8, u8) {
    let mut i2 = info2::WRITE;
    let mut i3 = 0u8;

    match policy.generation_policy {
        GenerationPolicy::None => {}
        GenerationPolicy::ExpectGenEqual => i2 |= info2::GENERATION,
        GenerationPolicy::ExpectGenGreater => i2 |= info2::GENERATION_GT,
    }

    match policy.record_exists_action {
        RecordExistsAction::Update => {}
        RecordExistsAction::UpdateOnly => i3 |= info3::UPDATE_ONLY,
        RecordExistsAction::Replace => i2 |= info2::REPLACE,
        RecordExistsAction::ReplaceOnly => i3 |= info3::REPLACE_ONLY,
        RecordExistsAction::CreateOnly => i2 |= info2::CREATE_ONLY,
    }

    if policy.commit_level == CommitLevel::Master {
        i3 |= info3::COMMIT_MASTER;
    }

    (i2, i3)
}

/// Writes `bins` to a record (spec §4.G; §8 scenarios 1-2).
pub fn write(cluster: &Arc<Cluster>, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<(), ResultCode> {
    let (info2_bits, info3_bits) = write_info2(policy);

    let resp = send_single(
        cluster,
        key,
        true,
        &policy.base,
        || {
            let ops = bins.iter().map(|b| crate::operation::put(&b.name, &b.value)).collect();
            Message::new(
                MsgHeader {
                    info2: info2_bits,
                    info3: info3_bits,
                    generation: policy.generation,
                    record_ttl: policy.expiration,
                    ..Default::default()
                },
                key_fields(key),
                ops,
            )
        },
    )?;

    command::check_result_code(resp.header.result_code)
}

/// Applies an arbitrary list of read/write/CDT ops to one record and
/// returns whatever the server sent back for the read ops among them (spec
/// §8 scenario 3: `[touch(ttl=120), read("e")]`).
pub fn operate(cluster: &Arc<Cluster>, policy: &WritePolicy, key: &Key, ops: Vec<Op>) -> Result<Record, ResultCode> {
    let (info2_bits, info3_bits) = write_info2(policy);
    let has_write = ops.iter().any(|o| {
        matches!(
            o.op,
            crate::proto::op::WRITE
                | crate::proto::op::CDT_MODIFY
                | crate::proto::op::MAP_MODIFY
                | crate::proto::op::INCR
                | crate::proto::op::APPEND
                | crate::proto::op::PREPEND
                | crate::proto::op::TOUCH
                | crate::proto::op::BIT_MODIFY
                | crate::proto::op::HLL_MODIFY
                | crate::proto::op::DELETE
        )
    });

    let resp = send_single(
        cluster,
        key,
        has_write,
        &policy.base,
        || {
            Message::new(
                MsgHeader {
                    info1: if has_write { 0 } else { info1::READ },
                    info2: if has_write { info2_bits } else { 0 },
                    info3: info3_bits,
                    generation: policy.generation,
                    record_ttl: policy.expiration,
                    ..Default::default()
                },
                key_fields(key),
                ops.clone(),
            )
        },
    )?;

    parse_record(&resp)
}

/// Resets a record's ttl without touching its bins (spec §4.G; uses the
/// bare `operation::touch` op plus the header's `record_ttl`).
pub fn touch(cluster: &Arc<Cluster>, policy: &WritePolicy, key: &Key) -> Result<(), ResultCode> {
    let (info2_bits, info3_bits) = write_info2(policy);

    let resp = send_single(
        cluster,
        key,
        true,
        &policy.base,
        || {
            Message::new(
                MsgHeader {
                    info2: info2_bits,
                    info3: info3_bits,
                    generation: policy.generation,
                    record_ttl: policy.expiration,
                    ..Default::default()
                },
                key_fields(key),
                vec![crate::operation::touch()],
            )
        },
    )?;

    command::check_result_code(resp.header.result_code)
}

/// Deletes a record; `Ok(true)` if a record existed to delete (spec §4.G).
pub fn delete(cluster: &Arc<Cluster>, policy: &WritePolicy, key: &Key) -> Result<bool, ResultCode> {
    let resp = send_single(
        cluster,
        key,
        true,
        &policy.base,
        || {
            Message::new(
                MsgHeader {
                    info2: info2::WRITE | info2::DELETE,
                    ..Default::default()
                },
                key_fields(key),
                vec![],
            )
        },
    )?;

    match resp.header.result_code {
        0 => Ok(true),
        2 => Ok(false),
        other => Err(ResultCode::from_wire(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_info2_maps_generation_policy_and_exists_action() {
        let mut policy = WritePolicy::default();
        policy.generation_policy = GenerationPolicy::ExpectGenEqual;
        policy.record_exists_action = RecordExistsAction::CreateOnly;
        let (i2, _i3) = write_info2(&policy);
        assert_eq!(i2 & info2::GENERATION, info2::GENERATION);
        assert_eq!(i2 & info2::CREATE_ONLY, info2::CREATE_ONLY);
    }

    #[test]
    fn write_info2_maps_commit_level_master_to_info3() {
        let mut policy = WritePolicy::default();
        policy.commit_level = CommitLevel::Master;
        let (_i2, i3) = write_info2(&policy);
        assert_eq!(i3 & info3::COMMIT_MASTER, info3::COMMIT_MASTER);
    }

    #[test]
    fn parse_record_surfaces_generation_error() {
        let resp = Message::new(
            MsgHeader {
                result_code: 3, // GENERATION_ERROR
                ..Default::default()
            },
            vec![],
            vec![],
        );
        assert_eq!(parse_record(&resp), Err(ResultCode::GenerationError));
    }

    #[test]
    fn parse_record_decodes_bins_by_particle_type() {
        let resp = Message::new(
            MsgHeader::default(),
            vec![],
            vec![
                Op::new(crate::proto::op::READ, crate::particle_type::INTEGER, "a", 123i64.to_be_bytes().to_vec()),
                Op::new(crate::proto::op::READ, crate::particle_type::STRING, "b", b"abc".to_vec()),
            ],
        );
        let record = parse_record(&resp).unwrap();
        assert_eq!(record.bin("a"), Some(&Value::Int(123)));
        assert_eq!(record.bin("b"), Some(&Value::String("abc".into())));
    }
}
