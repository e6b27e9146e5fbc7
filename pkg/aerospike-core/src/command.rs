//! Shared request/response plumbing for the transaction drivers (spec
//! §4.G: "four flavors share a common shape: compile request → select
//! node(s) → write → read and parse → return").

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cluster::Cluster;
use crate::errors::ResultCode;
use crate::key::DIGEST_SIZE;
use crate::node::{health, Node};
use crate::policy::BasePolicy;
use crate::pool::{self, Connection};
use crate::proto::Message;
use crate::record::Record;
use crate::value::Value;

/// Borrows an idle pooled connection if one is available, otherwise opens a
/// fresh one against any of the node's known addresses (spec §4.B
/// "pop-nowait" falling through to "Socket creation").
pub(crate) fn get_connection(node: &Node, timeout: Duration) -> Result<Connection, ResultCode> {
    if let Some(conn) = node.pool.pop_sync() {
        return Ok(conn);
    }
    let conn = pool::connect_any(&node.addresses(), timeout)?;
    conn.set_read_timeout(timeout)?;
    Ok(conn)
}

/// Writes `msg` and reads back one framed response, over a connection taken
/// from (and, on success, returned to) `node`'s pool. A connection that saw
/// an I/O error is dropped rather than pooled (spec §4.B: "a socket
/// returned after any I/O error must be closed, not returned to the pool"),
/// and the failure is charged against the node's health score (spec §4.C
/// "Health policy").
pub(crate) fn exchange(node: &Node, msg: &Message, timeout: Duration) -> Result<Message, ResultCode> {
    let mut conn = get_connection(node, timeout)?;

    let outcome = (|| -> Result<Message, ResultCode> {
        let framed = msg.encode_framed()?;
        conn.write_all(&framed).map_err(ResultCode::from)?;
        Message::read_framed(&mut conn)
    })();

    match outcome {
        Ok(resp) => {
            node.pool.push_sync(conn);
            Ok(resp)
        }
        Err(e) => {
            node.add_health(health::CONNECT_ERROR);
            Err(e)
        }
    }
}

/// Whether `e` is the kind of transient, local-socket failure spec §4.G
/// says is worth retrying on a freshly selected node, as opposed to a
/// result the server actually decided (e.g. `GenerationError`, which spec
/// §4.G singles out as never retried) or a local parse bug (`Protocol`,
/// which spec §7 says "is fatal to the current call" without retry).
pub(crate) fn is_retryable(e: &ResultCode) -> bool {
    matches!(e, ResultCode::Timeout | ResultCode::NoAvailableConnections | ResultCode::ClientError(_))
}

/// The result of one node attempt inside [`with_retries`].
pub(crate) enum Outcome<T> {
    Done(T),
    Retry(ResultCode),
    Fatal(ResultCode),
}

/// Runs `attempt` against a node chosen fresh each time (spec §4.G:
/// "re-selecting the node each time"), retrying up to `policy.max_retries`
/// times on transient failures and honoring `policy.total_timeout` as an
/// absolute deadline across every attempt.
pub(crate) fn with_retries<T>(
    cluster: &Arc<Cluster>,
    namespace: &str,
    digest: &[u8; DIGEST_SIZE],
    write: bool,
    policy: &BasePolicy,
    mut attempt: impl FnMut(&Arc<Node>) -> Outcome<T>,
) -> Result<T, ResultCode> {
    let deadline = policy.total_timeout.map(|d| Instant::now() + d);
    let mut last_err = ResultCode::NoAvailableConnections;

    for try_n in 0..=policy.max_retries {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(ResultCode::Timeout);
            }
        }

        let node = cluster.get_node(namespace, digest, write)?;
        match attempt(&node) {
            Outcome::Done(v) => return Ok(v),
            Outcome::Fatal(e) => return Err(e),
            Outcome::Retry(e) => {
                last_err = e;
                if try_n < policy.max_retries {
                    std::thread::sleep(policy.sleep_between_retries);
                }
            }
        }
    }

    Err(last_err)
}

/// Maps a non-OK `cl_msg` result code onto a `ResultCode`, treating `0` as
/// success (spec §4.A `result_code`, §7 "Propagation").
pub(crate) fn check_result_code(code: u8) -> Result<(), ResultCode> {
    if code == 0 {
        Ok(())
    } else {
        Err(ResultCode::from_wire(code))
    }
}

/// Decodes a response's ops into bins, keyed by particle type (spec §4.A
/// "Parser contract"). Shared by every driver that returns whole records:
/// single, batch, scan, query.
pub(crate) fn decode_record(resp: &Message) -> Result<Record, ResultCode> {
    let mut bins = HashMap::with_capacity(resp.ops.len());
    for op in &resp.ops {
        bins.insert(op.name.clone(), Value::decode_particle(op.particle_type, &op.value)?);
    }
    Ok(Record {
        bins,
        generation: resp.header.generation,
        expiration: resp.header.record_ttl,
    })
}
