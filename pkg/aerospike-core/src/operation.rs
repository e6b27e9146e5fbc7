//! Plain (non-CDT) op constructors for the `operate` driver (spec §4.A
//! "Operations", §4.G "Single-record driver").
//!
//! These build a `cl_msg` op directly, the same shape `cdt::list`/`cdt::map`
//! build CDT sub-ops in — this is the structural op vocabulary the codec
//! needs, not the ergonomic builder layer spec §1 excludes from scope.

use crate::particle_type;
use crate::proto::op::{self, Op};
use crate::value::Value;

pub fn get(bin: &str) -> Op {
    Op::new(op::READ, particle_type::NULL, bin, vec![])
}

/// A read op with an empty bin name reads every bin (spec §4.A info1
/// `GET_ALL`; at the op level this is simply "read, no name").
pub fn get_all() -> Op {
    Op::new(op::READ, particle_type::NULL, "", vec![])
}

pub fn put(bin: &str, value: &Value) -> Op {
    Op::new(op::WRITE, value.particle_type(), bin, value.encode_particle())
}

pub fn add(bin: &str, value: &Value) -> Op {
    Op::new(op::INCR, value.particle_type(), bin, value.encode_particle())
}

pub fn append(bin: &str, value: &Value) -> Op {
    Op::new(op::APPEND, value.particle_type(), bin, value.encode_particle())
}

pub fn prepend(bin: &str, value: &Value) -> Op {
    Op::new(op::PREPEND, value.particle_type(), bin, value.encode_particle())
}

/// A bare touch, used inline in an `operate` call (spec §8 scenario 3:
/// `[touch(ttl=120), read("e")]`). The per-call `record_ttl` header field
/// already carries the ttl; this op just orders the touch against the
/// other ops in the same transaction.
pub fn touch() -> Op {
    Op::new(op::TOUCH, particle_type::NULL, "", vec![])
}

pub fn delete() -> Op {
    Op::new(op::DELETE, particle_type::NULL, "", vec![])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_carries_the_value_particle_type_and_bytes() {
        let op = put("a", &Value::Int(123));
        assert_eq!(op.op, crate::proto::op::WRITE);
        assert_eq!(op.particle_type, particle_type::INTEGER);
        assert_eq!(op.value, 123i64.to_be_bytes().to_vec());
    }

    #[test]
    fn get_all_has_an_empty_bin_name() {
        assert_eq!(get_all().name, "");
    }
}
