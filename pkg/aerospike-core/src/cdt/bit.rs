//! Bit CDT sub-operations (spec §4.A, GLOSSARY "CDT").
//!
//! Bit ops address a blob bin as a packed bitstring; offsets and sizes are
//! in bits unless the variant name says "byte".

use crate::cdt::context::ContextBuilder;
use crate::cdt::encode_sub_op;
use crate::particle_type;
use crate::proto::op::{self, Op};
use crate::value::Value;

pub const RESIZE: u8 = 0;
pub const INSERT: u8 = 1;
pub const REMOVE: u8 = 2;
pub const SET: u8 = 3;
pub const OR: u8 = 4;
pub const XOR: u8 = 5;
pub const AND: u8 = 6;
pub const NOT: u8 = 7;
pub const LSHIFT: u8 = 8;
pub const RSHIFT: u8 = 9;
pub const ADD: u8 = 10;
pub const SUBTRACT: u8 = 11;
pub const SET_INT: u8 = 12;
pub const GET: u8 = 14;
pub const COUNT: u8 = 15;
pub const LSCAN: u8 = 16;
pub const RSCAN: u8 = 17;
pub const GET_INT: u8 = 18;

pub mod resize_flags {
    pub const DEFAULT: i64 = 0;
    pub const FROM_FRONT: i64 = 1;
    pub const GROW_ONLY: i64 = 2;
    pub const SHRINK_ONLY: i64 = 4;
}

fn modify_op(ctx: Option<ContextBuilder>, bin: &str, sub_op: u8, args: &[Value]) -> Op {
    Op::new(
        op::BIT_MODIFY,
        particle_type::NULL,
        bin,
        encode_sub_op(ctx, sub_op, args),
    )
}

fn read_op(ctx: Option<ContextBuilder>, bin: &str, sub_op: u8, args: &[Value]) -> Op {
    Op::new(
        op::BIT_READ,
        particle_type::NULL,
        bin,
        encode_sub_op(ctx, sub_op, args),
    )
}

pub fn resize(bin: &str, byte_size: i64, flags: i64) -> Op {
    modify_op(None, bin, RESIZE, &[Value::Int(byte_size), Value::Int(flags)])
}

pub fn set(bin: &str, bit_offset: i64, bit_size: i64, value: Vec<u8>) -> Op {
    modify_op(
        None,
        bin,
        SET,
        &[Value::Int(bit_offset), Value::Int(bit_size), Value::Blob(value)],
    )
}

pub fn or(bin: &str, bit_offset: i64, bit_size: i64, value: Vec<u8>) -> Op {
    modify_op(
        None,
        bin,
        OR,
        &[Value::Int(bit_offset), Value::Int(bit_size), Value::Blob(value)],
    )
}

pub fn add(bin: &str, bit_offset: i64, bit_size: i64, delta: i64, sign: bool, action: i64) -> Op {
    modify_op(
        None,
        bin,
        ADD,
        &[
            Value::Int(bit_offset),
            Value::Int(bit_size),
            Value::Int(delta),
            Value::Bool(sign),
            Value::Int(action),
        ],
    )
}

pub fn get(bin: &str, bit_offset: i64, bit_size: i64) -> Op {
    read_op(None, bin, GET, &[Value::Int(bit_offset), Value::Int(bit_size)])
}

pub fn count(bin: &str, bit_offset: i64, bit_size: i64) -> Op {
    read_op(None, bin, COUNT, &[Value::Int(bit_offset), Value::Int(bit_size)])
}

pub fn get_int(bin: &str, bit_offset: i64, bit_size: i64, sign: bool) -> Op {
    read_op(
        None,
        bin,
        GET_INT,
        &[Value::Int(bit_offset), Value::Int(bit_size), Value::Bool(sign)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgpack::Decoder;

    #[test]
    fn get_encodes_offset_and_size() {
        let built = get("b", 8, 16);
        assert_eq!(built.op, op::BIT_READ);
        let mut dec = Decoder::new(&built.value);
        match dec.read_value().unwrap() {
            Value::List(items) => {
                assert_eq!(items[0], Value::Int(GET as i64));
                assert_eq!(items[1], Value::Int(8));
                assert_eq!(items[2], Value::Int(16));
            }
            other => panic!("expected array, got {:?}", other),
        }
    }
}
