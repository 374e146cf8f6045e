//! Address codec.
//!
//! An address is `ndo` followed by the first 42 hex characters of the
//! Ed25519 public key and a 2-byte Blake2b checksum: 49 characters total.
//! Derivation is deterministic, so a public key always proves ownership of
//! exactly one address.

use crate::hashing::{CHECKSUM_LEN, blake2b_hex};

/// Prefix carried by every address.
pub const ADDRESS_PREFIX: &str = "ndo";

/// Public-key hex characters embedded in the address.
pub const ADDRESS_KEY_LEN: usize = 42;

/// Total address length: prefix + key chars + checksum hex.
pub const ADDRESS_LEN: usize = ADDRESS_PREFIX.len() + ADDRESS_KEY_LEN + CHECKSUM_LEN * 2;

/// Computes the checksum over the prefixed key payload.
///
/// The checksum input wraps the payload in single quotes. Historical
/// encoding; existing addresses on chain depend on it.
pub fn make_checksum(payload: &str) -> String {
    blake2b_hex(format!("'{payload}'").as_bytes(), CHECKSUM_LEN)
}

/// Derives the address for a hex-encoded public key.
pub fn make_address(public_key: &str) -> String {
    let key_part: String = public_key.chars().take(ADDRESS_KEY_LEN).collect();
    let no_checksum = format!("{ADDRESS_PREFIX}{key_part}");
    let checksum = make_checksum(&no_checksum);
    format!("{no_checksum}{checksum}")
}

/// Checks shape, prefix and checksum of an address.
pub fn validate_address(address: &str) -> bool {
    if address.len() != ADDRESS_LEN || !address.starts_with(ADDRESS_PREFIX) {
        return false;
    }
    if !address.is_ascii() {
        return false;
    }
    let split = address.len() - CHECKSUM_LEN * 2;
    address[split..] == make_checksum(&address[..split])
}

/// True when `public_key` derives to `sender`.
pub fn proof_sender(public_key: &str, sender: &str) -> bool {
    make_address(public_key) == sender
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS_ADDRESS: &str = "ndo18c3afa286439e7ebcb284710dbd4ae42bdaf21b80137b";

    #[test]
    fn genesis_address_validates() {
        assert_eq!(GENESIS_ADDRESS.len(), ADDRESS_LEN);
        assert!(validate_address(GENESIS_ADDRESS));
    }

    #[test]
    fn derivation_is_deterministic_and_validates() {
        let public_key = "96381e3725f85cfe0ab8de17623957b4565ca9b04d37b903075f2723600c21e3";
        let address = make_address(public_key);

        assert_eq!(address, make_address(public_key));
        assert_eq!(address.len(), ADDRESS_LEN);
        assert!(validate_address(&address));
        assert!(proof_sender(public_key, &address));
    }

    #[test]
    fn corrupted_addresses_fail() {
        let public_key = "96381e3725f85cfe0ab8de17623957b4565ca9b04d37b903075f2723600c21e3";
        let address = make_address(public_key);

        // Flip one payload character.
        let mut chars: Vec<char> = address.chars().collect();
        chars[4] = if chars[4] == 'a' { 'b' } else { 'a' };
        let flipped: String = chars.into_iter().collect();
        assert!(!validate_address(&flipped));

        assert!(!validate_address("ndo"));
        assert!(!validate_address(&address[..address.len() - 1]));
        assert!(!validate_address(&format!("xyz{}", &address[3..])));
    }

    #[test]
    fn wrong_key_does_not_prove_sender() {
        let address = make_address("96381e3725f85cfe0ab8de17623957b4565ca9b04d37b903075f2723600c21e3");
        assert!(!proof_sender(
            "0000000000000000000000000000000000000000000000000000000000000000",
            &address
        ));
    }
}
