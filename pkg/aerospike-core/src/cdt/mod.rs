//! CDT (list/map/bit/HLL) sub-operations (spec §4.A, GLOSSARY).
//!
//! Each sub-operation's value is a msgpack payload: an optional context
//! extension element (see [`context`]) followed by an array whose first
//! element is the sub-op code and the rest are its arguments.

pub mod bit;
pub mod context;
pub mod hll;
pub mod list;
pub mod map;

pub use context::ContextBuilder;

use crate::msgpack::Encoder;
use crate::value::Value;
use context::ContextBuilder;

/// Encodes one CDT sub-operation's value bytes: `[ctx_ext]? [sub_op, arg...]`.
pub fn encode_sub_op(ctx: Option<ContextBuilder>, sub_op: u8, args: &[Value]) -> Vec<u8> {
    let mut enc = Encoder::new();

    if let Some(ctx) = ctx {
        if !ctx.is_empty() {
            ctx.encode_ext(&mut enc);
        }
    }

    enc.write_array_header(1 + args.len());
    enc.write_int(sub_op as i64);
    for arg in args {
        enc.write_value(arg);
    }

    enc.into_bytes()
}
