//! The one-byte particle type tags used on the wire (spec §3, §4.A).
//!
//! Values match the wire protocol exactly — they are not an internal
//! convention this crate is free to renumber.

pub const NULL: u8 = 0;
pub const INTEGER: u8 = 1;
pub const FLOAT: u8 = 2;
pub const STRING: u8 = 3;
pub const BLOB: u8 = 4;
pub const DIGEST: u8 = 6;
pub const JAVA_BLOB: u8 = 7;
pub const CSHARP_BLOB: u8 = 8;
pub const PYTHON_BLOB: u8 = 9;
pub const PHP_BLOB: u8 = 10;
pub const ERLANG_BLOB: u8 = 11;
pub const BOOL: u8 = 17;
pub const HLL: u8 = 18;
pub const MAP: u8 = 19;
pub const LIST: u8 = 20;
pub const LDT: u8 = 21;
pub const GEOJSON: u8 = 23;

/// A sentinel used only in filter expressions / CDT context, never
/// serialized as a bin's own particle type.
pub const WILDCARD: u8 = 255;

pub fn name(t: u8) -> &'static str {
    match t {
        NULL => "nil",
        INTEGER => "integer",
        FLOAT => "float",
        STRING => "string",
        BLOB => "blob",
        DIGEST => "digest",
        BOOL => "bool",
        HLL => "hll",
        MAP => "map",
        LIST => "list",
        GEOJSON => "geojson",
        _ => "unknown",
    }
}
