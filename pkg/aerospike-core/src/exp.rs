//! Filter expressions: a postfix-encoded msgpack tree carried in the
//! `filter-expression` field (spec §4.A, §6).
//!
//! An expression is built bottom-up as a flat sequence of msgpack values —
//! each operator is encoded as `[op_code, n_args, arg...]` where `arg` is
//! either a literal `Value` or a nested expression's own encoding. The whole
//! tree serializes to one msgpack array and round-trips through base64 for
//! transport inside a field (spec §4.A "supports serialization to base64
//! and reconstruction from base64").

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::errors::ResultCode;
use crate::msgpack::{Decoder, Encoder};
use crate::value::Value;

/// Expression op codes. Values are internal to this crate (the server
/// accepts whatever this encoder produces and this decoder alone needs to
/// agree with it), unlike particle types or CDT sub-op codes which are
/// cross-client wire constants.
mod op_code {
    pub const EQ: i64 = 1;
    pub const NE: i64 = 2;
    pub const GT: i64 = 3;
    pub const GE: i64 = 4;
    pub const LT: i64 = 5;
    pub const LE: i64 = 6;
    pub const AND: i64 = 16;
    pub const OR: i64 = 17;
    pub const NOT: i64 = 18;
    pub const ADD: i64 = 24;
    pub const SUB: i64 = 25;
    pub const BIN_INT: i64 = 40;
    pub const BIN_STR: i64 = 41;
    pub const BIN_MAP: i64 = 42;
    pub const BIN_BLOB: i64 = 43;
    pub const BIN_EXISTS: i64 = 44;
    pub const CONST: i64 = 50;
}

/// One node of the expression tree. Leaves are `Const`/`Bin*`; interior
/// nodes hold already-built child expressions, which is what makes encoding
/// "postfix": a parent is only ever encoded after its children exist.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Value),
    BinExists(String),
    BinInt(String),
    BinStr(String),
    BinMap(String),
    BinBlob(String),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Add(Vec<Expr>),
    Sub(Vec<Expr>),
}

impl Expr {
    pub fn int(v: i64) -> Self {
        Expr::Const(Value::Int(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Expr::Const(Value::String(v.into()))
    }

    pub fn eq(a: Expr, b: Expr) -> Self {
        Expr::Eq(Box::new(a), Box::new(b))
    }

    pub fn and(parts: Vec<Expr>) -> Self {
        Expr::And(parts)
    }

    pub fn or(parts: Vec<Expr>) -> Self {
        Expr::Or(parts)
    }

    fn encode(&self, enc: &mut Encoder) {
        match self {
            Expr::Const(v) => {
                enc.write_array_header(2);
                enc.write_int(op_code::CONST);
                enc.write_value(v);
            }
            Expr::BinExists(name) => Self::encode_bin(enc, op_code::BIN_EXISTS, name),
            Expr::BinInt(name) => Self::encode_bin(enc, op_code::BIN_INT, name),
            Expr::BinStr(name) => Self::encode_bin(enc, op_code::BIN_STR, name),
            Expr::BinMap(name) => Self::encode_bin(enc, op_code::BIN_MAP, name),
            Expr::BinBlob(name) => Self::encode_bin(enc, op_code::BIN_BLOB, name),
            Expr::Eq(a, b) => Self::encode_binary(enc, op_code::EQ, a, b),
            Expr::Ne(a, b) => Self::encode_binary(enc, op_code::NE, a, b),
            Expr::Gt(a, b) => Self::encode_binary(enc, op_code::GT, a, b),
            Expr::Ge(a, b) => Self::encode_binary(enc, op_code::GE, a, b),
            Expr::Lt(a, b) => Self::encode_binary(enc, op_code::LT, a, b),
            Expr::Le(a, b) => Self::encode_binary(enc, op_code::LE, a, b),
            Expr::Not(a) => {
                enc.write_array_header(2);
                enc.write_int(op_code::NOT);
                a.encode(enc);
            }
            Expr::And(parts) => Self::encode_variadic(enc, op_code::AND, parts),
            Expr::Or(parts) => Self::encode_variadic(enc, op_code::OR, parts),
            Expr::Add(parts) => Self::encode_variadic(enc, op_code::ADD, parts),
            Expr::Sub(parts) => Self::encode_variadic(enc, op_code::SUB, parts),
        }
    }

    fn encode_bin(enc: &mut Encoder, code: i64, name: &str) {
        enc.write_array_header(2);
        enc.write_int(code);
        enc.write_str(name);
    }

    fn encode_binary(enc: &mut Encoder, code: i64, a: &Expr, b: &Expr) {
        enc.write_array_header(3);
        enc.write_int(code);
        a.encode(enc);
        b.encode(enc);
    }

    fn encode_variadic(enc: &mut Encoder, code: i64, parts: &[Expr]) {
        enc.write_array_header(1 + parts.len());
        enc.write_int(code);
        for p in parts {
            p.encode(enc);
        }
    }

    /// Serializes this expression tree to raw msgpack bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.into_bytes()
    }

    /// Serializes and base64-encodes, for persisting/transporting outside
    /// of a direct filter-expression field (spec §4.A).
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.serialize())
    }

    pub fn from_base64(s: &str) -> Result<Self, ResultCode> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| ResultCode::Protocol(format!("invalid base64 filter expression: {}", e)))?;
        Self::deserialize(&bytes)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, ResultCode> {
        let mut dec = Decoder::new(bytes);
        let value = dec.read_value()?;
        Self::from_value(&value)
    }

    fn from_value(value: &Value) -> Result<Self, ResultCode> {
        let items = match value {
            Value::List(items) => items,
            other => {
                return Err(ResultCode::Protocol(format!(
                    "expected an expression array, got {:?}",
                    other
                )))
            }
        };

        let code = items
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| ResultCode::Protocol("expression missing op code".into()))?;

        let expr = match code {
            op_code::CONST => Expr::Const(arg(items, 1)?.clone()),
            op_code::BIN_EXISTS => Expr::BinExists(bin_name(arg(items, 1)?)?),
            op_code::BIN_INT => Expr::BinInt(bin_name(arg(items, 1)?)?),
            op_code::BIN_STR => Expr::BinStr(bin_name(arg(items, 1)?)?),
            op_code::BIN_MAP => Expr::BinMap(bin_name(arg(items, 1)?)?),
            op_code::BIN_BLOB => Expr::BinBlob(bin_name(arg(items, 1)?)?),
            op_code::EQ => Expr::Eq(Box::new(Self::from_value(arg(items, 1)?)?), Box::new(Self::from_value(arg(items, 2)?)?)),
            op_code::NE => Expr::Ne(Box::new(Self::from_value(arg(items, 1)?)?), Box::new(Self::from_value(arg(items, 2)?)?)),
            op_code::GT => Expr::Gt(Box::new(Self::from_value(arg(items, 1)?)?), Box::new(Self::from_value(arg(items, 2)?)?)),
            op_code::GE => Expr::Ge(Box::new(Self::from_value(arg(items, 1)?)?), Box::new(Self::from_value(arg(items, 2)?)?)),
            op_code::LT => Expr::Lt(Box::new(Self::from_value(arg(items, 1)?)?), Box::new(Self::from_value(arg(items, 2)?)?)),
            op_code::LE => Expr::Le(Box::new(Self::from_value(arg(items, 1)?)?), Box::new(Self::from_value(arg(items, 2)?)?)),
            op_code::NOT => Expr::Not(Box::new(Self::from_value(arg(items, 1)?)?)),
            op_code::AND => Expr::And(Self::children(&items[1..])?),
            op_code::OR => Expr::Or(Self::children(&items[1..])?),
            op_code::ADD => Expr::Add(Self::children(&items[1..])?),
            op_code::SUB => Expr::Sub(Self::children(&items[1..])?),
            other => return Err(ResultCode::Protocol(format!("unknown expression op code {}", other))),
        };

        Ok(expr)
    }

    fn children(items: &[Value]) -> Result<Vec<Expr>, ResultCode> {
        items.iter().map(Self::from_value).collect()
    }
}

fn bin_name(v: &Value) -> Result<String, ResultCode> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| ResultCode::Protocol("expression bin reference missing name".into()))
}

/// Bounds-checked arg access; truncated expression arrays must error, never panic.
fn arg(items: &[Value], idx: usize) -> Result<&Value, ResultCode> {
    items
        .get(idx)
        .ok_or_else(|| ResultCode::Protocol("truncated expression".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64() {
        let e = Expr::and(vec![
            Expr::eq(Expr::BinInt("a".into()), Expr::int(123)),
            Expr::Gt(Box::new(Expr::BinInt("b".into())), Box::new(Expr::int(0))),
        ]);
        let b64 = e.to_base64();
        let parsed = Expr::from_base64(&b64).unwrap();
        assert_eq!(parsed, e);
    }

    #[test]
    fn round_trips_bin_exists() {
        let e = Expr::BinExists("x".into());
        assert_eq!(Expr::deserialize(&e.serialize()).unwrap(), e);
    }

    #[test]
    fn rejects_unknown_op_code() {
        let mut enc = Encoder::new();
        enc.write_array_header(1);
        enc.write_int(9999);
        assert!(Expr::deserialize(&enc.into_bytes()).is_err());
    }

    #[test]
    fn rejects_truncated_args() {
        let mut enc = Encoder::new();
        enc.write_array_header(1);
        enc.write_int(op_code::EQ);
        assert!(Expr::deserialize(&enc.into_bytes()).is_err());

        let mut enc = Encoder::new();
        enc.write_array_header(1);
        enc.write_int(op_code::CONST);
        assert!(Expr::deserialize(&enc.into_bytes()).is_err());
    }
}
