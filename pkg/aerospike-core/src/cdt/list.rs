//! List CDT sub-operations (spec §4.A, GLOSSARY "CDT").
//!
//! Each function builds one `Op` of type [`crate::proto::op::CDT_READ`] or
//! [`crate::proto::op::CDT_MODIFY`] whose value is the msgpack sub-op
//! payload `encode_sub_op` produces.

use crate::cdt::context::ContextBuilder;
use crate::cdt::encode_sub_op;
use crate::particle_type;
use crate::proto::op::{self, Op};
use crate::value::Value;

pub const SET_TYPE: u8 = 0;
pub const APPEND: u8 = 1;
pub const APPEND_ITEMS: u8 = 2;
pub const INSERT: u8 = 3;
pub const INSERT_ITEMS: u8 = 4;
pub const POP: u8 = 5;
pub const POP_RANGE: u8 = 6;
pub const REMOVE: u8 = 7;
pub const REMOVE_RANGE: u8 = 8;
pub const SET: u8 = 9;
pub const TRIM: u8 = 10;
pub const CLEAR: u8 = 11;
pub const INCREMENT: u8 = 12;
pub const SORT: u8 = 13;
pub const SIZE: u8 = 16;
pub const GET: u8 = 17;
pub const GET_RANGE: u8 = 18;
pub const GET_BY_INDEX: u8 = 19;
pub const GET_BY_INDEX_RANGE: u8 = 20;
pub const GET_BY_RANK: u8 = 21;
pub const GET_BY_RANK_RANGE: u8 = 22;
pub const GET_BY_VALUE: u8 = 23;
pub const GET_BY_VALUE_RANGE: u8 = 24;
pub const GET_BY_VALUE_LIST: u8 = 25;
pub const GET_BY_VALUE_REL_RANK_RANGE: u8 = 26;
pub const REMOVE_BY_INDEX: u8 = 32;
pub const REMOVE_BY_INDEX_RANGE: u8 = 33;
pub const REMOVE_BY_RANK: u8 = 34;
pub const REMOVE_BY_RANK_RANGE: u8 = 35;
pub const REMOVE_BY_VALUE: u8 = 36;
pub const REMOVE_BY_VALUE_RANGE: u8 = 37;
pub const REMOVE_BY_VALUE_LIST: u8 = 38;
pub const REMOVE_BY_VALUE_REL_RANK_RANGE: u8 = 39;

/// Rank/index selectors can additionally request the return value shape;
/// spec leaves this a server convention rather than client-computed, so we
/// just pass the flag byte through.
pub mod return_type {
    pub const NONE: i64 = 0;
    pub const INDEX: i64 = 1;
    pub const REVERSE_INDEX: i64 = 2;
    pub const RANK: i64 = 3;
    pub const REVERSE_RANK: i64 = 4;
    pub const COUNT: i64 = 5;
    pub const VALUE: i64 = 7;
}

fn modify_op(ctx: Option<ContextBuilder>, bin: &str, sub_op: u8, args: &[Value]) -> Op {
    let value = encode_sub_op(ctx, sub_op, args);
    Op::new(op::CDT_MODIFY, particle_type::NULL, bin, value)
}

fn read_op(ctx: Option<ContextBuilder>, bin: &str, sub_op: u8, args: &[Value]) -> Op {
    let value = encode_sub_op(ctx, sub_op, args);
    Op::new(op::CDT_READ, particle_type::NULL, bin, value)
}

pub fn append(bin: &str, value: Value) -> Op {
    modify_op(None, bin, APPEND, &[value])
}

pub fn insert(bin: &str, index: i64, value: Value) -> Op {
    modify_op(None, bin, INSERT, &[Value::Int(index), value])
}

pub fn set(bin: &str, index: i64, value: Value) -> Op {
    modify_op(None, bin, SET, &[Value::Int(index), value])
}

pub fn clear(bin: &str) -> Op {
    modify_op(None, bin, CLEAR, &[])
}

pub fn remove(bin: &str, index: i64) -> Op {
    modify_op(None, bin, REMOVE, &[Value::Int(index)])
}

pub fn size(bin: &str) -> Op {
    read_op(None, bin, SIZE, &[])
}

pub fn get(bin: &str, index: i64) -> Op {
    read_op(None, bin, GET, &[Value::Int(index)])
}

pub fn get_by_index(bin: &str, index: i64, return_type: i64) -> Op {
    read_op(None, bin, GET_BY_INDEX, &[Value::Int(return_type), Value::Int(index)])
}

pub fn get_by_rank(bin: &str, rank: i64, return_type: i64) -> Op {
    read_op(None, bin, GET_BY_RANK, &[Value::Int(return_type), Value::Int(rank)])
}

/// `get_by_rank_range(-3, 3, ...)` (spec §8 scenario 4) selects the 3
/// highest-ranked entries.
pub fn get_by_rank_range(bin: &str, rank: i64, count: i64, return_type: i64) -> Op {
    read_op(
        None,
        bin,
        GET_BY_RANK_RANGE,
        &[Value::Int(return_type), Value::Int(rank), Value::Int(count)],
    )
}

pub fn get_by_value(bin: &str, value: Value, return_type: i64) -> Op {
    read_op(None, bin, GET_BY_VALUE, &[Value::Int(return_type), value])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgpack::Decoder;

    #[test]
    fn get_by_rank_range_encodes_subop_and_args_in_order() {
        let built = get_by_rank_range("e", -3, 3, return_type::VALUE);
        assert_eq!(built.op, op::CDT_READ);

        let mut dec = Decoder::new(&built.value);
        let decoded = dec.read_value().unwrap();
        match decoded {
            Value::List(items) => {
                assert_eq!(items[0], Value::Int(GET_BY_RANK_RANGE as i64));
                assert_eq!(items[1], Value::Int(return_type::VALUE));
                assert_eq!(items[2], Value::Int(-3));
                assert_eq!(items[3], Value::Int(3));
            }
            other => panic!("expected array, got {:?}", other),
        }
    }
}
