//! Error taxonomy for the cluster/codec core.
//!
//! `ResultCode` is a flat enumeration of the distinguishable error kinds
//! named in spec §7 — it intentionally does *not* collapse the named server
//! result codes into a generic "server error" bucket, since callers must be
//! able to match on e.g. `GenerationError` vs `RecordNotFound` without
//! parsing a string. It converts into the workspace-wide `common::errors::Error`
//! via `From`, the same boundary pattern `BitIoError` uses in
//! `common::bits`.

use common::errors::Fail;

pub use common::errors::{err_msg, format_err, Error};

pub type Result<T> = std::result::Result<T, ResultCode>;

/// Every error kind a caller of this crate needs to distinguish (spec §7).
///
/// Variants carrying a server result code store it verbatim (`code`) so a
/// caller that needs the raw wire value for logging/metrics still has it,
/// without forcing every caller to match on the numeric code instead of the
/// kind.
#[derive(Debug, Fail, Clone, PartialEq, Eq)]
pub enum ResultCode {
    #[fail(display = "timed out waiting for a response")]
    Timeout,

    #[fail(display = "no available connections to any known node address")]
    NoAvailableConnections,

    #[fail(display = "client error: {}", _0)]
    ClientError(String),

    #[fail(display = "malformed request field: {}", _0)]
    ParamError(String),

    #[fail(display = "server error (code {})", _0)]
    ServerError(u8),

    #[fail(display = "record not found")]
    RecordNotFound,

    #[fail(display = "generation mismatch")]
    GenerationError,

    #[fail(display = "bin already exists")]
    BinExists,

    #[fail(display = "bin not found")]
    BinNotFound,

    #[fail(display = "cluster key mismatch")]
    ClusterKeyMismatch,

    #[fail(display = "partition unavailable")]
    PartitionUnavailable,

    #[fail(display = "operation not applicable to this record")]
    OpNotApplicable,

    #[fail(display = "record filtered out by expression")]
    FilteredOut,

    #[fail(display = "unsupported server feature")]
    UnsupportedFeature,

    #[fail(display = "secondary index already exists")]
    IndexFound,

    #[fail(display = "secondary index not found")]
    IndexNotFound,

    #[fail(display = "malformed UDF response")]
    UdfBadResponse,

    #[fail(display = "bin has an incompatible type for this operation")]
    BinIncompatibleType,

    #[fail(display = "async command queue is full")]
    AsyncQueueFull,

    /// Wire-format violation. Carries enough to locate the bug; never
    /// retried and never counted against a node's health score (spec §7:
    /// "the bug is local").
    #[fail(display = "protocol error: {}", _0)]
    Protocol(String),
}

impl ResultCode {
    /// Maps a raw server result-code byte (spec §4.A `cl_msg.result_code`)
    /// onto a `ResultCode`. Codes without a named variant above become
    /// `ServerError(code)`.
    pub fn from_wire(code: u8) -> Self {
        match code {
            0 => ResultCode::ServerError(0), // caller checks for 0 == OK before calling this
            2 => ResultCode::RecordNotFound,
            3 => ResultCode::GenerationError,
            4 => ResultCode::ParamError("server rejected request parameters".into()),
            5 => ResultCode::BinExists,
            9 => ResultCode::ClusterKeyMismatch,
            11 => ResultCode::PartitionUnavailable,
            13 => ResultCode::BinIncompatibleType,
            17 => ResultCode::BinNotFound,
            20 => ResultCode::OpNotApplicable,
            22 => ResultCode::FilteredOut,
            27 => ResultCode::UnsupportedFeature,
            100 => ResultCode::IndexFound,
            201 => ResultCode::IndexNotFound,
            other => ResultCode::ServerError(other),
        }
    }
}

impl From<std::io::Error> for ResultCode {
    fn from(e: std::io::Error) -> Self {
        ResultCode::ClientError(e.to_string())
    }
}

impl From<ResultCode> for Error {
    fn from(e: ResultCode) -> Self {
        format_err!("{}", e)
    }
}
