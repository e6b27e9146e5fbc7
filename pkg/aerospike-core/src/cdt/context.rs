//! CDT context: the path of steps ("go into this nested list/map element")
//! that precedes a sub-operation (spec §4.A).
//!
//! The step stack is almost always one or two elements deep (rarely more
//! than a handful for deeply nested documents), so it is kept in a
//! fixed-capacity ring buffer used as a LIFO stack rather than a `Vec` —
//! the same "fixed-capacity container for short-lived parsing scratch" the
//! design notes (spec §9) call for in place of the source's ad-hoc
//! stack-vs-heap vector.

use common::fixed_queue::FixedQueue;

use crate::errors::ResultCode;
use crate::msgpack::Encoder;
use crate::value::Value;

/// A context is bounded in practice by how deeply nested a document can
/// realistically be walked in one request; 32 is generous headroom.
const MAX_CONTEXT_DEPTH: usize = 32;

const LIST_INDEX: u8 = 0x10;
const LIST_RANK: u8 = 0x11;
const LIST_VALUE: u8 = 0x13;
const MAP_INDEX: u8 = 0x20;
const MAP_RANK: u8 = 0x21;
const MAP_KEY: u8 = 0x22;
const MAP_VALUE: u8 = 0x23;

/// Set on a step's type byte (bitwise-or'd in) to mean "create this
/// container if it does not already exist while walking down to it".
const CREATE_FLAG: u8 = 0x40;

#[derive(Debug, Clone, PartialEq)]
enum StepKind {
    ListIndex(i64),
    ListRank(i64),
    ListValue(Value),
    MapIndex(i64),
    MapRank(i64),
    MapKey(Value),
    MapValue(Value),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    kind: StepKind,
    create: bool,
}

/// Builds a CDT context path. Consumed by `encode_ext` into the msgpack
/// extension element a CDT op's value is prefixed with when non-empty.
pub struct ContextBuilder {
    steps: FixedQueue<Step>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            steps: FixedQueue::new(MAX_CONTEXT_DEPTH),
        }
    }

    fn push(&mut self, kind: StepKind, create: bool) -> Result<&mut Self, ResultCode> {
        if self.steps.push_back(Step { kind, create }).is_some() {
            return Err(ResultCode::ParamError(
                "CDT context path is too deeply nested".into(),
            ));
        }
        Ok(self)
    }

    pub fn list_index(&mut self, index: i64) -> Result<&mut Self, ResultCode> {
        self.push(StepKind::ListIndex(index), false)
    }

    pub fn list_index_create(&mut self, index: i64) -> Result<&mut Self, ResultCode> {
        self.push(StepKind::ListIndex(index), true)
    }

    pub fn list_rank(&mut self, rank: i64) -> Result<&mut Self, ResultCode> {
        self.push(StepKind::ListRank(rank), false)
    }

    pub fn list_value(&mut self, value: Value) -> Result<&mut Self, ResultCode> {
        self.push(StepKind::ListValue(value), false)
    }

    pub fn map_index(&mut self, index: i64) -> Result<&mut Self, ResultCode> {
        self.push(StepKind::MapIndex(index), false)
    }

    pub fn map_rank(&mut self, rank: i64) -> Result<&mut Self, ResultCode> {
        self.push(StepKind::MapRank(rank), false)
    }

    pub fn map_key(&mut self, key: Value) -> Result<&mut Self, ResultCode> {
        self.push(StepKind::MapKey(key), false)
    }

    pub fn map_key_create(&mut self, key: Value) -> Result<&mut Self, ResultCode> {
        self.push(StepKind::MapKey(key), true)
    }

    pub fn map_value(&mut self, value: Value) -> Result<&mut Self, ResultCode> {
        self.push(StepKind::MapValue(value), false)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Drains the steps (oldest first, i.e. outermost-to-innermost) into an
    /// ordered `Vec` for encoding. Consumes `self`.
    fn ordered_steps(mut self) -> Vec<Step> {
        // FixedQueue only exposes LIFO pop_back, so collect then reverse to
        // restore push order.
        let mut rev = Vec::new();
        while let Some(step) = self.steps.pop_back() {
            rev.push(step);
        }
        rev.reverse();
        rev
    }

    /// Encodes this context as the msgpack extension element that precedes
    /// a CDT op's sub-op array (spec §4.A), writing nothing if the context
    /// is empty.
    pub fn encode_ext(self, enc: &mut Encoder) {
        if self.steps.is_empty() {
            return;
        }

        let steps = self.ordered_steps();

        // Extension element: array of [type, value] pairs, one per step.
        enc.write_array_header(steps.len() * 2);
        for step in steps {
            let (type_byte, value) = match step.kind {
                StepKind::ListIndex(i) => (LIST_INDEX, Value::Int(i)),
                StepKind::ListRank(r) => (LIST_RANK, Value::Int(r)),
                StepKind::ListValue(v) => (LIST_VALUE, v),
                StepKind::MapIndex(i) => (MAP_INDEX, Value::Int(i)),
                StepKind::MapRank(r) => (MAP_RANK, Value::Int(r)),
                StepKind::MapKey(k) => (MAP_KEY, k),
                StepKind::MapValue(v) => (MAP_VALUE, v),
            };

            let type_byte = if step.create {
                type_byte | CREATE_FLAG
            } else {
                type_byte
            };

            enc.write_int(type_byte as i64);
            enc.write_value(&value);
        }
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_encodes_nothing() {
        let ctx = ContextBuilder::new();
        let mut enc = Encoder::new();
        ctx.encode_ext(&mut enc);
        assert!(enc.into_bytes().is_empty());
    }

    #[test]
    fn preserves_push_order() {
        let mut ctx = ContextBuilder::new();
        ctx.map_key(Value::String("a".into())).unwrap();
        ctx.list_index(3).unwrap();

        let mut enc = Encoder::new();
        ctx.encode_ext(&mut enc);
        let bytes = enc.into_bytes();

        let mut dec = crate::msgpack::Decoder::new(&bytes);
        let decoded = dec.read_value().unwrap();
        match decoded {
            Value::List(items) => {
                assert_eq!(items.len(), 4);
                assert_eq!(items[0], Value::Int(MAP_KEY as i64));
                assert_eq!(items[1], Value::String("a".into()));
                assert_eq!(items[2], Value::Int(LIST_INDEX as i64));
                assert_eq!(items[3], Value::Int(3));
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn rejects_overly_deep_context() {
        let mut ctx = ContextBuilder::new();
        for i in 0..MAX_CONTEXT_DEPTH {
            assert!(ctx.list_index(i as i64).is_ok());
        }
        assert!(ctx.list_index(999).is_err());
    }
}
