//! Secondary-index query transaction driver (spec §4.G "Query driver").
//!
//! Structurally this is a scan restricted to records matching an index
//! range/equality filter: one request per node, `INDEX_NAME`/`INDEX_RANGE`
//! fields naming the filter, a `cl_msg` stream per node terminated by info3
//! `LAST`. UDF-backed aggregation queries are out of scope (spec §1
//! Non-goals: no UDF/Lua layer) — this driver only ever returns whole or
//! bin-filtered records.

use std::io::Write as _;
use std::sync::Arc;

use crossbeam_channel::bounded;

use crate::cluster::Cluster;
use crate::command;
use crate::errors::ResultCode;
use crate::key::Key;
use crate::msgpack::Encoder;
use crate::node::{health, Node};
use crate::policy::{QueryPolicy, ScanConcurrency};
use crate::proto::field::{self, Field};
use crate::proto::message::{info1, MsgHeader};
use crate::proto::Message;
use crate::record::Record;
use crate::value::Value;

/// A secondary-index predicate on one bin (spec §4.G "Query driver"). This
/// crate carries only the two shapes a non-UDF query needs.
pub enum QueryFilter {
    Equals(Value),
    Range(Value, Value),
}

impl QueryFilter {
    fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        match self {
            QueryFilter::Equals(v) => {
                enc.write_array_header(1);
                enc.write_value(v);
            }
            QueryFilter::Range(lo, hi) => {
                enc.write_array_header(2);
                enc.write_value(lo);
                enc.write_value(hi);
            }
        }
        enc.into_bytes()
    }
}

fn query_fields(namespace: &str, set_name: Option<&str>, bin_name: &str, filter: &QueryFilter, bin_names: Option<&[&str]>) -> Vec<Field> {
    let mut fields = vec![Field::string(field::NAMESPACE, namespace)];
    if let Some(set_name) = set_name {
        fields.push(Field::string(field::SET_NAME, set_name));
    }
    fields.push(Field::string(field::INDEX_NAME, bin_name));
    fields.push(Field::new(field::INDEX_RANGE, filter.encode()));

    if let Some(names) = bin_names {
        let mut data = Vec::new();
        data.extend_from_slice(&(names.len() as u16).to_be_bytes());
        for name in names {
            data.push(name.len() as u8);
            data.extend_from_slice(name.as_bytes());
        }
        fields.push(Field::new(field::QUERY_BINLIST, data));
    }

    fields
}

fn query_node(node: &Arc<Node>, policy: &QueryPolicy, namespace: &str, set_name: Option<&str>, bin_name: &str, filter: &QueryFilter, bin_names: Option<&[&str]>, on_record: &mut dyn FnMut(Key, Record)) -> Result<(), ResultCode> {
    let info1_bits = if bin_names.is_some() { info1::READ } else { info1::READ | info1::GET_ALL };

    let msg = Message::new(
        MsgHeader {
            info1: info1_bits,
            ..Default::default()
        },
        query_fields(namespace, set_name, bin_name, filter, bin_names),
        vec![],
    );

    let mut conn = command::get_connection(node, policy.base.socket_timeout)?;

    let sent = msg
        .encode_framed()
        .and_then(|framed| conn.write_all(&framed).map_err(ResultCode::from));
    if let Err(e) = sent {
        node.add_health(health::CONNECT_ERROR);
        return Err(e);
    }

    loop {
        let resp = match Message::read_framed(&mut conn) {
            Ok(m) => m,
            Err(e) => {
                node.add_health(health::CONNECT_ERROR);
                return Err(e);
            }
        };

        if resp.header.result_code != 0 {
            return Err(ResultCode::from_wire(resp.header.result_code));
        }

        if !resp.ops.is_empty() {
            if let Some(field) = resp.fields.iter().find(|f| f.field_type == field::DIGEST_RIPE) {
                if field.data.len() == crate::key::DIGEST_SIZE {
                    let mut digest = [0u8; crate::key::DIGEST_SIZE];
                    digest.copy_from_slice(&field.data);
                    let key = Key::from_digest(namespace, digest);
                    let record = command::decode_record(&resp)?;
                    on_record(key, record);
                }
            }
        }

        if resp.is_last() {
            break;
        }
    }

    node.pool.push_sync(conn);
    Ok(())
}

/// Runs a secondary-index query against `bin_name` across every node in the
/// cluster, delivering matches to `on_record` as they stream in. Node
/// workers publish onto a channel sized by `policy.record_queue_size` (the
/// same bounded-producer shape [`crate::async_transport`] uses for pipelined
/// writes) so a slow consumer applies backpressure to the workers instead
/// of letting results pile up unbounded in memory.
pub fn query(
    cluster: &Arc<Cluster>,
    policy: &QueryPolicy,
    namespace: &str,
    set_name: Option<&str>,
    bin_name: &str,
    filter: QueryFilter,
    bin_names: Option<&[&str]>,
    mut on_record: impl FnMut(Key, Record),
) -> Result<(), ResultCode> {
    let nodes = cluster.nodes();

    match policy.concurrency {
        ScanConcurrency::Serial => {
            for node in &nodes {
                query_node(node, policy, namespace, set_name, bin_name, &filter, bin_names, &mut on_record)?;
            }
            Ok(())
        }
        ScanConcurrency::Concurrent => {
            let (tx, rx) = bounded::<(Key, Record)>(policy.record_queue_size.max(1));

            let result = std::thread::scope(|scope| -> Result<(), ResultCode> {
                let handles: Vec<_> = nodes
                    .iter()
                    .map(|node| {
                        let tx = tx.clone();
                        scope.spawn(move || {
                            let mut push = |k: Key, r: Record| {
                                let _ = tx.send((k, r));
                            };
                            query_node(node, policy, namespace, set_name, bin_name, &filter, bin_names, &mut push)
                        })
                    })
                    .collect();
                drop(tx);

                for (k, r) in rx.iter() {
                    on_record(k, r);
                }

                let mut first_err = None;
                for h in handles {
                    if let Err(e) = h.join().unwrap_or(Err(ResultCode::ClientError("query worker panicked".into()))) {
                        first_err.get_or_insert(e);
                    }
                }
                match first_err {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            });

            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_filter_encodes_a_single_element_array() {
        let filter = QueryFilter::Equals(Value::Int(7));
        let bytes = filter.encode();
        let value = crate::msgpack::Decoder::new(&bytes).read_value().unwrap();
        assert_eq!(value, Value::List(vec![Value::Int(7)]));
    }

    #[test]
    fn range_filter_encodes_lo_and_hi() {
        let filter = QueryFilter::Range(Value::Int(1), Value::Int(100));
        let bytes = filter.encode();
        let value = crate::msgpack::Decoder::new(&bytes).read_value().unwrap();
        assert_eq!(value, Value::List(vec![Value::Int(1), Value::Int(100)]));
    }

    #[test]
    fn query_fields_include_the_bin_name_and_range() {
        let filter = QueryFilter::Equals(Value::Int(1));
        let fields = query_fields("test", None, "idx_bin", &filter, None);
        assert!(fields.iter().any(|f| f.field_type == field::INDEX_NAME && f.data == b"idx_bin"));
        assert!(fields.iter().any(|f| f.field_type == field::INDEX_RANGE));
    }
}
