//! Map CDT sub-operations (spec §4.A, GLOSSARY "CDT").
//!
//! Map writes additionally carry a map-order flag in their sub-op argument
//! list so the server knows how to maintain the map's internal ordering
//! (spec §3: "the map encoding carries an extension header describing
//! order").

use crate::cdt::context::ContextBuilder;
use crate::cdt::encode_sub_op;
use crate::msgpack::MapOrder;
use crate::particle_type;
use crate::proto::op::{self, Op};
use crate::value::Value;

pub const SET_TYPE: u8 = 64;
pub const ADD: u8 = 65;
pub const ADD_ITEMS: u8 = 66;
pub const PUT: u8 = 67;
pub const PUT_ITEMS: u8 = 68;
pub const REPLACE: u8 = 69;
pub const REPLACE_ITEMS: u8 = 70;
pub const INCREMENT: u8 = 73;
pub const DECREMENT: u8 = 74;
pub const CLEAR: u8 = 75;
pub const REMOVE_BY_KEY: u8 = 76;
pub const REMOVE_BY_INDEX: u8 = 77;
pub const REMOVE_BY_RANK: u8 = 79;
pub const REMOVE_BY_KEY_LIST: u8 = 81;
pub const REMOVE_BY_VALUE: u8 = 82;
pub const REMOVE_BY_KEY_RANGE: u8 = 83;
pub const REMOVE_BY_INDEX_RANGE: u8 = 84;
pub const REMOVE_BY_VALUE_RANGE: u8 = 85;
pub const REMOVE_BY_KEY_REL_INDEX_RANGE: u8 = 86;
pub const REMOVE_BY_VALUE_REL_RANK_RANGE: u8 = 87;
pub const REMOVE_BY_RANK_RANGE: u8 = 88;
pub const SIZE: u8 = 96;
pub const GET_BY_KEY: u8 = 97;
pub const GET_BY_INDEX: u8 = 98;
pub const GET_BY_RANK: u8 = 100;
pub const GET_BY_VALUE: u8 = 102;
pub const GET_BY_KEY_RANGE: u8 = 103;
pub const GET_BY_VALUE_RANGE: u8 = 104;
pub const GET_BY_KEY_LIST: u8 = 105;
pub const GET_BY_VALUE_LIST: u8 = 106;
pub const GET_BY_INDEX_RANGE: u8 = 107;
pub const GET_BY_RANK_RANGE: u8 = 109;
pub const GET_BY_KEY_REL_INDEX_RANGE: u8 = 110;
pub const GET_BY_VALUE_REL_RANK_RANGE: u8 = 111;

pub use crate::cdt::list::return_type;

fn modify_op(ctx: Option<ContextBuilder>, bin: &str, sub_op: u8, args: &[Value]) -> Op {
    let value = encode_sub_op(ctx, sub_op, args);
    Op::new(op::MAP_MODIFY, particle_type::NULL, bin, value)
}

fn read_op(ctx: Option<ContextBuilder>, bin: &str, sub_op: u8, args: &[Value]) -> Op {
    let value = encode_sub_op(ctx, sub_op, args);
    Op::new(op::MAP_READ, particle_type::NULL, bin, value)
}

/// `SET_TYPE` takes the order flag as its lone argument; real clients
/// prepend this to the first write against a bin whose order they want to
/// fix (spec §8 scenario 4: `KEY_ORDERED`).
pub fn set_type(bin: &str, order: MapOrder) -> Op {
    let flag = match order {
        MapOrder::Unordered => 0,
        MapOrder::KeyOrdered => 1,
        MapOrder::KeyValueOrdered => 3,
    };
    modify_op(None, bin, SET_TYPE, &[Value::Int(flag)])
}

pub fn put(bin: &str, key: Value, value: Value, order: MapOrder) -> Op {
    let flag = match order {
        MapOrder::Unordered => 0,
        MapOrder::KeyOrdered => 1,
        MapOrder::KeyValueOrdered => 3,
    };
    modify_op(None, bin, PUT, &[key, value, Value::Int(flag)])
}

/// Puts every entry of `items` (spec §8 scenario 4: `put_items`).
pub fn put_items(bin: &str, items: Vec<(Value, Value)>, order: MapOrder) -> Op {
    let flag = match order {
        MapOrder::Unordered => 0,
        MapOrder::KeyOrdered => 1,
        MapOrder::KeyValueOrdered => 3,
    };
    modify_op(
        None,
        bin,
        PUT_ITEMS,
        &[Value::Map(order, items), Value::Int(flag)],
    )
}

pub fn clear(bin: &str) -> Op {
    modify_op(None, bin, CLEAR, &[])
}

pub fn remove_by_key(bin: &str, key: Value, return_type: i64) -> Op {
    modify_op(None, bin, REMOVE_BY_KEY, &[Value::Int(return_type), key])
}

pub fn increment(bin: &str, key: Value, delta: Value) -> Op {
    modify_op(None, bin, INCREMENT, &[key, delta])
}

pub fn size(bin: &str) -> Op {
    read_op(None, bin, SIZE, &[])
}

pub fn get_by_key(bin: &str, key: Value, return_type: i64) -> Op {
    read_op(None, bin, GET_BY_KEY, &[Value::Int(return_type), key])
}

pub fn get_by_index(bin: &str, index: i64, return_type: i64) -> Op {
    read_op(None, bin, GET_BY_INDEX, &[Value::Int(return_type), Value::Int(index)])
}

pub fn get_by_rank(bin: &str, rank: i64, return_type: i64) -> Op {
    read_op(None, bin, GET_BY_RANK, &[Value::Int(return_type), Value::Int(rank)])
}

/// `get_by_rank_range(-3, 3, KEY)` (spec §8 scenario 4) returns the 3
/// entries with the highest rank, ordered ascending by rank.
pub fn get_by_rank_range(bin: &str, rank: i64, count: i64, return_type: i64) -> Op {
    read_op(
        None,
        bin,
        GET_BY_RANK_RANGE,
        &[Value::Int(return_type), Value::Int(rank), Value::Int(count)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgpack::Decoder;

    #[test]
    fn put_items_carries_the_full_map_and_order_flag() {
        let items = vec![
            (Value::String("Jim".into()), Value::Int(98)),
            (Value::String("Charlie".into()), Value::Int(55)),
        ];
        let built = put_items("m", items.clone(), MapOrder::KeyOrdered);
        assert_eq!(built.op, op::MAP_MODIFY);

        let mut dec = Decoder::new(&built.value);
        let decoded = dec.read_value().unwrap();
        match decoded {
            Value::List(parts) => {
                assert_eq!(parts[0], Value::Int(PUT_ITEMS as i64));
                match &parts[1] {
                    Value::Map(MapOrder::KeyOrdered, got) => assert_eq!(got, &items),
                    other => panic!("expected key-ordered map, got {:?}", other),
                }
                assert_eq!(parts[2], Value::Int(1));
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn get_by_rank_range_is_a_map_read_op() {
        let built = get_by_rank_range("m", -3, 3, return_type::VALUE);
        assert_eq!(built.op, op::MAP_READ);
    }
}
