//! Common error type used throughout the workspace.
//!
//! Mirrors the pattern used elsewhere in this tree: a single boxed error
//! type from the `failure` crate rather than a bespoke enum per module, with
//! `format_err!`/`err_msg` available for ad-hoc error construction at the
//! leaves.

pub use failure::err_msg;
pub use failure::format_err;
pub use failure::Error;
pub use failure::Fail;

pub type Result<T, E = Error> = std::result::Result<T, E>;
