//! Record keys and the digest that identifies them on the wire (spec §3).

use digest::Digest;
use ripemd::Ripemd160;

use crate::errors::ResultCode;
use crate::particle_type;

pub const DIGEST_SIZE: usize = 20;

/// The application-supplied user key, prior to digest computation.
#[derive(Debug, Clone, PartialEq)]
pub enum UserKey {
    Int(i64),
    String(String),
    Blob(Vec<u8>),
}

impl UserKey {
    fn particle_type(&self) -> u8 {
        match self {
            UserKey::Int(_) => particle_type::INTEGER,
            UserKey::String(_) => particle_type::STRING,
            UserKey::Blob(_) => particle_type::BLOB,
        }
    }

    /// The canonical on-wire byte encoding used as digest input (spec §3):
    /// integers are 8-byte big-endian, strings are raw UTF-8, blobs are raw.
    fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            UserKey::Int(i) => i.to_be_bytes().to_vec(),
            UserKey::String(s) => s.as_bytes().to_vec(),
            UserKey::Blob(b) => b.clone(),
        }
    }
}

impl From<i64> for UserKey {
    fn from(v: i64) -> Self {
        UserKey::Int(v)
    }
}

impl From<&str> for UserKey {
    fn from(v: &str) -> Self {
        UserKey::String(v.to_string())
    }
}

impl From<Vec<u8>> for UserKey {
    fn from(v: Vec<u8>) -> Self {
        UserKey::Blob(v)
    }
}

/// `digest = RIPEMD160(set_bytes || type_byte || key_bytes_canonical)`
/// (spec §3, §4.A).
pub fn compute_digest(set: &str, user_key: &UserKey) -> [u8; DIGEST_SIZE] {
    let mut hasher = Ripemd160::new();
    hasher.update(set.as_bytes());
    hasher.update([user_key.particle_type()]);
    hasher.update(user_key.canonical_bytes());

    let result = hasher.finalize();
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&result);
    out
}

/// `partition_id_from(d) = (d[0] | d[1] << 8) & (n_partitions - 1)`
/// (spec §3, §8). `n_partitions` must be a power of two.
pub fn partition_id_from(digest: &[u8; DIGEST_SIZE], n_partitions: u32) -> u32 {
    debug_assert!(n_partitions.is_power_of_two());
    let id = (digest[0] as u32) | ((digest[1] as u32) << 8);
    id & (n_partitions - 1)
}

/// A fully-qualified record key: `(namespace, set, user_key)` plus the
/// digest computed from it (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub namespace: String,
    pub set_name: String,
    pub user_key: Option<UserKey>,
    pub digest: [u8; DIGEST_SIZE],
}

impl Key {
    pub fn new(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        user_key: impl Into<UserKey>,
    ) -> Result<Self, ResultCode> {
        let namespace = namespace.into();
        let set_name = set_name.into();
        let user_key = user_key.into();

        if namespace.len() > 31 {
            return Err(ResultCode::ParamError(format!(
                "namespace {:?} exceeds 31 bytes",
                namespace
            )));
        }
        if set_name.len() > 63 {
            return Err(ResultCode::ParamError(format!(
                "set {:?} exceeds 63 bytes",
                set_name
            )));
        }

        let digest = compute_digest(&set_name, &user_key);

        Ok(Self {
            namespace,
            set_name,
            user_key: Some(user_key),
            digest,
        })
    }

    /// Builds a key directly from a precomputed digest, with no user key
    /// retained (used when a batch/scan response only carries a digest).
    pub fn from_digest(namespace: impl Into<String>, digest: [u8; DIGEST_SIZE]) -> Self {
        Self {
            namespace: namespace.into(),
            set_name: String::new(),
            user_key: None,
            digest,
        }
    }

    pub fn partition_id(&self, n_partitions: u32) -> u32 {
        partition_id_from(&self.digest, n_partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_for_the_same_inputs() {
        let d1 = compute_digest("kb", &UserKey::Int(42));
        let d2 = compute_digest("kb", &UserKey::Int(42));
        assert_eq!(d1, d2);

        let d3 = compute_digest("kb", &UserKey::Int(43));
        assert_ne!(d1, d3);
    }

    #[test]
    fn partition_id_is_in_range_for_every_power_of_two() {
        let digest = compute_digest("kb", &UserKey::String("hello".into()));
        let mut n_partitions = 1u32;
        while n_partitions <= 16384 {
            let id = partition_id_from(&digest, n_partitions);
            assert!(id < n_partitions);
            assert_eq!(
                id,
                ((digest[0] as u32) | ((digest[1] as u32) << 8)) & (n_partitions - 1)
            );
            n_partitions *= 2;
        }
    }

    #[test]
    fn rejects_oversized_namespace_and_set() {
        assert!(Key::new("a".repeat(32), "set", 1i64).is_err());
        assert!(Key::new("ns", "b".repeat(64), 1i64).is_err());
        assert!(Key::new("ns", "set", 1i64).is_ok());
    }
}
