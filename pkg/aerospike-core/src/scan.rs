//! Scan transaction driver: a full-namespace (optionally full-set) sweep
//! over every live node (spec §4.G "Scan driver").
//!
//! Each node is sent one scan request and streams back `cl_msg`-framed
//! records on the same connection until an info3 `LAST` bit closes that
//! node's share of the scan; results are delivered to the caller through a
//! callback as they arrive rather than collected, since a full scan can
//! outgrow memory (spec §9 design notes: streaming, not buffering).

use std::io::Write as _;
use std::sync::Arc;

use crate::cluster::Cluster;
use crate::command;
use crate::errors::ResultCode;
use crate::key::Key;
use crate::node::{health, Node};
use crate::policy::{ScanConcurrency, ScanPolicy};
use crate::proto::field::{self, Field};
use crate::proto::message::{info1, MsgHeader};
use crate::proto::Message;
use crate::record::Record;

fn scan_fields(namespace: &str, set_name: Option<&str>, policy: &ScanPolicy, bin_names: Option<&[&str]>) -> Vec<Field> {
    let mut fields = vec![Field::string(field::NAMESPACE, namespace)];
    if let Some(set_name) = set_name {
        fields.push(Field::string(field::SET_NAME, set_name));
    }

    let mut options = 0u8;
    if policy.fail_on_cluster_change {
        options |= 1;
    }
    fields.push(Field::new(field::SCAN_OPTIONS, vec![options]));

    if policy.max_records > 0 {
        fields.push(Field::new(field::MAX_RECORDS, policy.max_records.to_be_bytes().to_vec()));
    }

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

/// Streams one node's share of the scan, invoking `on_record` for every hit
/// until that node's stream ends (info3 `LAST`) or a non-OK result aborts
/// it (spec §4.G: "ends when every node sent LAST or any node reports
/// non-OK").
fn scan_node(node: &Arc<Node>, policy: &ScanPolicy, namespace: &str, set_name: Option<&str>, bin_names: Option<&[&str]>, on_record: &mut dyn FnMut(Key, Record)) -> Result<(), ResultCode> {
    let mut info1_bits = info1::READ | info1::GET_ALL;
    if bin_names.is_some() {
        info1_bits = info1::READ;
    }

    let msg = Message::new(
        MsgHeader {
            info1: info1_bits,
            ..Default::default()
        },
        scan_fields(namespace, set_name, policy, bin_names),
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
            let digest_field = resp.fields.iter().find(|f| f.field_type == field::DIGEST_RIPE);
            if let Some(field) = digest_field {
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

/// Scans `namespace` (optionally restricted to `set_name`) across every
/// node currently known to the cluster, delivering each record to
/// `on_record` as it streams in (spec §8 scenario 4: "scan namespace `test`
/// concurrently across all nodes... every key inserted in step 1 is
/// observed exactly once").
pub fn scan(
    cluster: &Arc<Cluster>,
    policy: &ScanPolicy,
    namespace: &str,
    set_name: Option<&str>,
    bin_names: Option<&[&str]>,
    mut on_record: impl FnMut(Key, Record) + Send,
) -> Result<(), ResultCode> {
    let nodes = cluster.nodes();
    let mut before = cluster.node_names();
    before.sort();

    let changed = |cluster: &Arc<Cluster>| {
        let mut now = cluster.node_names();
        now.sort();
        now != before
    };

    match policy.concurrency {
        ScanConcurrency::Serial => {
            for node in &nodes {
                scan_node(node, policy, namespace, set_name, bin_names, &mut on_record)?;
                if policy.fail_on_cluster_change && changed(cluster) {
                    return Err(ResultCode::ClusterKeyMismatch);
                }
            }
            Ok(())
        }
        ScanConcurrency::Concurrent => {
            let on_record = std::sync::Mutex::new(on_record);
            let result = std::thread::scope(|scope| -> Result<(), ResultCode> {
                let handles: Vec<_> = nodes
                    .iter()
                    .map(|node| {
                        scope.spawn(|| {
                            let mut push = |k: Key, r: Record| {
                                let mut guard = on_record.lock().unwrap();
                                (&mut *guard)(k, r)
                            };
                            scan_node(node, policy, namespace, set_name, bin_names, &mut push)
                        })
                    })
                    .collect();

                let mut first_err = None;
                for h in handles {
                    if let Err(e) = h.join().unwrap_or(Err(ResultCode::ClientError("scan worker panicked".into()))) {
                        first_err.get_or_insert(e);
                    }
                }
                match first_err {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            });

            if policy.fail_on_cluster_change && changed(cluster) {
                return Err(ResultCode::ClusterKeyMismatch);
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_fields_include_max_records_only_when_set() {
        let mut policy = ScanPolicy::default();
        let fields = scan_fields("test", None, &policy, None);
        assert!(!fields.iter().any(|f| f.field_type == field::MAX_RECORDS));

        policy.max_records = 100;
        let fields = scan_fields("test", None, &policy, None);
        assert!(fields.iter().any(|f| f.field_type == field::MAX_RECORDS));
    }

    #[test]
    fn scan_fields_carry_the_set_name_when_given() {
        let fields = scan_fields("test", Some("kb"), &ScanPolicy::default(), None);
        assert!(fields.iter().any(|f| f.field_type == field::SET_NAME && f.data == b"kb"));
    }
}
