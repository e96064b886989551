//! API key issuance and verification.
//!
//! Only a salted digest plus a short display prefix are ever stored; the
//! raw key is returned exactly once at issuance and is unrecoverable
//! afterwards. Verification is a constant-time comparison.

use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const KEY_RANDOM_LEN: usize = 32;
const SALT_LEN: usize = 16;
const PREFIX_LEN: usize = 8;
const HEX_CHARSET: &[u8] = b"0123456789abcdef";

/// The one-time output of issuing a key: the raw secret, the hash to
/// persist, and the non-secret prefix for display.
#[derive(Clone, Debug)]
pub struct IssuedKey {
    pub raw: String,
    pub hash: String,
    pub prefix: String,
}

/// Generate a fresh API key for a tenant: `{slug head}_{32 hex chars}`.
pub fn issue_api_key(slug: &str) -> IssuedKey {
    let head: String = slug.chars().take(2).collect();
    let raw = format!("{head}_{}", random_hex(KEY_RANDOM_LEN));
    let hash = hash_api_key(&raw);
    let prefix = raw.chars().take(PREFIX_LEN).collect();
    IssuedKey { raw, hash, prefix }
}

/// Salted SHA-256 at rest, encoded `{salt}${digest}` in lowercase hex.
pub fn hash_api_key(raw: &str) -> String {
    let salt = random_hex(SALT_LEN);
    format!("{salt}${}", digest_hex(&salt, raw))
}

/// Constant-time comparison of a presented key against a stored hash.
/// A stored value that does not parse never verifies.
pub fn verify_api_key(stored: &str, presented: &str) -> bool {
    let Some((salt, digest)) = stored.split_once('$') else {
        return false;
    };
    let computed = digest_hex(salt, presented);
    computed.as_bytes().ct_eq(digest.as_bytes()).into()
}

fn digest_hex(salt: &str, raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(raw.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..HEX_CHARSET.len());
            HEX_CHARSET[idx] as char
        })
        .collect()
}
