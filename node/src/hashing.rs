//! Content hashing and canonical encodings.
//!
//! Every identifier in the chain (txid, block hash, pool hashes, producer
//! set hashes, address checksums) is a Blake2b digest rendered as lowercase
//! hex. Hashes over structured values always go through the canonical JSON
//! encoding defined here, so the same logical value maps to the same digest
//! on every node.

use blake2::Blake2bVar;
use blake2::digest::{Update, VariableOutput};
use rand::Rng;
use serde::Serialize;

/// Digest size in bytes for all content hashes.
pub const HASH_LEN: usize = 32;

/// Digest size in bytes for address checksums.
pub const CHECKSUM_LEN: usize = 2;

/// Computes a variable-size Blake2b digest of raw bytes, hex-encoded.
pub fn blake2b_hex(data: &[u8], size: usize) -> String {
    let mut hasher = Blake2bVar::new(size).expect("digest size within Blake2b bounds");
    hasher.update(data);
    let mut out = vec![0u8; size];
    hasher
        .finalize_variable(&mut out)
        .expect("output buffer sized to digest");
    hex::encode(out)
}

/// Returns the canonical byte encoding of a serializable value.
///
/// Canonical form is compact JSON. Struct fields serialize in declaration
/// order, which keeps the encoding stable across nodes as long as the type
/// definitions match.
///
/// # Panics
///
/// Panics if encoding fails; all hashed types are plain data and are
/// required to be serializable.
pub fn canonical_json<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("canonical value should always encode to JSON")
}

/// Computes the 32-byte Blake2b hash of a value's canonical encoding.
pub fn blake2b_hash<T: Serialize>(value: &T) -> String {
    blake2b_hex(&canonical_json(value), HASH_LEN)
}

/// Hash-links two values into a single digest.
///
/// Used for chaining: block hashes commit to `(parent_hash, block body)`,
/// and producer scoring mingles `(address, block_hash)`.
pub fn blake2b_hash_link<A: Serialize, B: Serialize>(link_from: &A, link_to: &B) -> String {
    blake2b_hash(&(link_from, link_to))
}

/// Generates a short random lowercase nonce.
///
/// Nonces only disambiguate otherwise-identical drafts from the same
/// sender; they carry no entropy guarantees beyond that.
pub fn create_nonce() -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}

/// Encodes a string for use as a filesystem key (peer files).
pub fn base64_encode(data: &str) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(data.as_bytes())
}

/// Inverse of [`base64_encode`].
pub fn base64_decode(data: &str) -> Option<String> {
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD.decode(data).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake2b_hex_is_deterministic_and_sized() {
        let a = blake2b_hex(b"nado", HASH_LEN);
        let b = blake2b_hex(b"nado", HASH_LEN);
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_LEN * 2);

        let short = blake2b_hex(b"nado", CHECKSUM_LEN);
        assert_eq!(short.len(), CHECKSUM_LEN * 2);
        assert_ne!(a[..4], short[..]);
    }

    #[test]
    fn hash_link_orders_operands() {
        let ab = blake2b_hash_link(&"a", &"b");
        let ba = blake2b_hash_link(&"b", &"a");
        assert_ne!(ab, ba);
    }

    #[test]
    fn canonical_json_respects_field_order() {
        #[derive(serde::Serialize)]
        struct Probe {
            first: u32,
            second: &'static str,
        }

        let bytes = canonical_json(&Probe {
            first: 1,
            second: "two",
        });
        assert_eq!(bytes, br#"{"first":1,"second":"two"}"#);
    }

    #[test]
    fn nonce_shape() {
        let nonce = create_nonce();
        assert_eq!(nonce.len(), 8);
        assert!(nonce.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn base64_roundtrip() {
        let ip = "203.0.113.7";
        let encoded = base64_encode(ip);
        assert_eq!(base64_decode(&encoded).as_deref(), Some(ip));
    }
}
