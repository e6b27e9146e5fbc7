//! The binary wire protocol: proto framing, `cl_msg` fields/ops (spec §4.A).

pub mod field;
pub mod header;
pub mod message;
pub mod op;

pub use header::ProtoHeader;
pub use message::{Message, MsgHeader};
