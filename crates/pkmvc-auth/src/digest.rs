//! Salted password digests.
//!
//! ```text
//! digest = hex(SHA256(salt || password))
//! ```
//!
//! The salt is stored hex encoded next to the digest, and the hex text (not
//! the raw bytes) is what gets hashed.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Generate a hex-encoded salt from `length` random bytes.
///
/// Uses `OsRng` for cryptographically secure random generation.
pub fn generate_salt(length: usize) -> String {
    use rand::RngCore;
    use rand::rngs::OsRng;
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    to_hex(&bytes)
}

/// Compute the lowercase hex digest of `salt || password`.
pub fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    to_hex(&hasher.finalize())
}

/// Check `password` against a stored salt and digest in constant time.
pub fn verify_password(salt: &str, password: &str, expected: &str) -> bool {
    let actual = password_digest(salt, password);
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_vector() {
        // SHA256("abc")
        assert_eq!(
            password_digest("a", "bc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn salts_are_hex_and_random() {
        let a = generate_salt(16);
        let b = generate_salt(16);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn verify_accepts_only_the_right_password() {
        let salt = generate_salt(8);
        let digest = password_digest(&salt, "secret");
        assert!(verify_password(&salt, "secret", &digest));
        assert!(!verify_password(&salt, "wrong", &digest));
        assert!(!verify_password("other", "secret", &digest));
        assert!(!verify_password(&salt, "secret", ""));
    }
}
