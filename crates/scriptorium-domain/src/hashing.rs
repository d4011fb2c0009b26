//! Content hashing helpers

use sha2::{Digest, Sha256};

/// Number of hex characters kept in a content-derived entity id
pub const ID_HEX_LEN: usize = 32;

/// SHA-256 digest of `bytes` as lowercase hex
///
/// # Examples
///
/// ```
/// use scriptorium_domain::sha256_hex;
///
/// let digest = sha256_hex(b"abc");
/// assert_eq!(digest.len(), 64);
/// assert!(digest.starts_with("ba7816bf"));
/// ```
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 over a sequence of fields joined by the unit separator
///
/// Joining with `\u{1f}` keeps `("ab", "c")` and `("a", "bc")` distinct.
pub fn hash_fields<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for (idx, field) in fields.into_iter().enumerate() {
        if idx > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Build a prefixed entity id from a hex digest (e.g. `ku_3fa2...`)
pub fn prefixed_id(prefix: &str, digest: &str) -> String {
    let cut = digest.len().min(ID_HEX_LEN);
    format!("{}_{}", prefix, &digest[..cut])
}
