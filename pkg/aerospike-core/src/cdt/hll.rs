//! HyperLogLog CDT sub-operations (spec §4.A, GLOSSARY "CDT").

use crate::cdt::context::ContextBuilder;
use crate::cdt::encode_sub_op;
use crate::particle_type;
use crate::proto::op::{self, Op};
use crate::value::Value;

pub const INIT: u8 = 0;
pub const ADD: u8 = 1;
pub const SET_UNION: u8 = 2;
pub const SET_COUNT: u8 = 3;
pub const FOLD: u8 = 4;
pub const COUNT: u8 = 5;
pub const UNION: u8 = 6;
pub const UNION_COUNT: u8 = 7;
pub const INTERSECT_COUNT: u8 = 8;
pub const SIMILARITY: u8 = 9;
pub const DESCRIBE: u8 = 10;
pub const MAY_CONTAIN: u8 = 11;

fn modify_op(ctx: Option<ContextBuilder>, bin: &str, sub_op: u8, args: &[Value]) -> Op {
    Op::new(
        op::HLL_MODIFY,
        particle_type::NULL,
        bin,
        encode_sub_op(ctx, sub_op, args),
    )
}

fn read_op(ctx: Option<ContextBuilder>, bin: &str, sub_op: u8, args: &[Value]) -> Op {
    Op::new(
        op::HLL_READ,
        particle_type::NULL,
        bin,
        encode_sub_op(ctx, sub_op, args),
    )
}

pub fn init(bin: &str, index_bit_count: i64) -> Op {
    modify_op(None, bin, INIT, &[Value::Int(index_bit_count)])
}

pub fn add(bin: &str, values: Vec<Value>, index_bit_count: i64) -> Op {
    modify_op(
        None,
        bin,
        ADD,
        &[Value::List(values), Value::Int(index_bit_count)],
    )
}

pub fn count(bin: &str) -> Op {
    read_op(None, bin, COUNT, &[])
}

pub fn describe(bin: &str) -> Op {
    read_op(None, bin, DESCRIBE, &[])
}

pub fn get_count(bin: &str) -> Op {
    read_op(None, bin, COUNT, &[])
}

pub fn union_count(bin: &str, hlls: Vec<Value>) -> Op {
    read_op(None, bin, UNION_COUNT, &[Value::List(hlls)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_an_hll_modify_op() {
        let built = add("h", vec![Value::Blob(vec![1, 2, 3])], 10);
        assert_eq!(built.op, op::HLL_MODIFY);
    }

    #[test]
    fn count_is_an_hll_read_op() {
        assert_eq!(count("h").op, op::HLL_READ);
    }
}
