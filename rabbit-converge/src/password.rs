//! Salted password digests in the broker's native credential format.
//!
//! A stored credential is `base64(salt ++ digest(salt ++ utf8(password)))`
//! with a 4 byte salt. Checking a candidate password never recovers the
//! plaintext: the salt is taken from the stored value, the digest recomputed,
//! and the two encodings compared.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::error::ConvergeError;

/// Salt length in bytes.
pub const SALT_LEN: usize = 4;

/// Digest algorithms understood by the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashingAlgorithm {
    #[default]
    #[serde(rename = "rabbit_password_hashing_sha256")]
    Sha256,
    #[serde(rename = "rabbit_password_hashing_sha512")]
    Sha512,
}

impl HashingAlgorithm {
    /// Name used by the management API.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashingAlgorithm::Sha256 => "rabbit_password_hashing_sha256",
            HashingAlgorithm::Sha512 => "rabbit_password_hashing_sha512",
        }
    }

    /// Look up an algorithm by its management API name.
    ///
    /// A blank name is the broker default, SHA-256.
    pub fn from_name(name: &str) -> Result<Self, ConvergeError> {
        match name {
            "" | "rabbit_password_hashing_sha256" => Ok(HashingAlgorithm::Sha256),
            "rabbit_password_hashing_sha512" => Ok(HashingAlgorithm::Sha512),
            other => Err(ConvergeError::configuration(format!(
                "unknown hashing algorithm {}",
                other
            ))),
        }
    }

    fn digest(&self, salt: &[u8], password: &str) -> Vec<u8> {
        match self {
            HashingAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(salt);
                hasher.update(password.as_bytes());
                hasher.finalize().to_vec()
            }
            HashingAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(salt);
                hasher.update(password.as_bytes());
                hasher.finalize().to_vec()
            }
        }
    }
}

/// Encode `password` with an explicit salt.
pub fn hash_with_salt(password: &str, algorithm: HashingAlgorithm, salt: [u8; SALT_LEN]) -> String {
    let mut encoded = salt.to_vec();
    encoded.extend(algorithm.digest(&salt, password));
    STANDARD.encode(encoded)
}

/// Encode `password` with a fresh random salt.
pub fn hash_password(password: &str, algorithm: HashingAlgorithm) -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    hash_with_salt(password, algorithm, salt)
}

/// Check `password` against a stored credential by recomputing it with the
/// stored salt.
///
/// A stored value that does not decode, or is too short to carry a salt,
/// never matches.
pub fn verify_password(stored: &str, password: &str, algorithm: HashingAlgorithm) -> bool {
    let Ok(decoded) = STANDARD.decode(stored) else {
        return false;
    };
    let Some(salt) = decoded
        .get(..SALT_LEN)
        .and_then(|bytes| <[u8; SALT_LEN]>::try_from(bytes).ok())
    else {
        return false;
    };
    hash_with_salt(password, algorithm, salt) == stored
}

/// Generate a random alphanumeric password.
pub fn generate_password(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifies_broker_generated_hash() {
        // Default credential of the stock broker image.
        let stored = "xCVmNzPVKZ+UFbHtacLM6/3f/atNng4nD8L2koLijbqJqoyF";
        assert!(verify_password(stored, "guest", HashingAlgorithm::Sha256));
        assert!(!verify_password(stored, "Guest", HashingAlgorithm::Sha256));
    }

    #[test]
    fn test_known_digests() {
        assert!(verify_password(
            "KDYrITM0cP6OZ4+ZoB0+T1SY9Ro1hbOgH4iiaPbLAAoPb0Xn",
            "supersecret",
            HashingAlgorithm::Sha256
        ));
        assert_eq!(
            hash_with_salt("guest", HashingAlgorithm::Sha512, [1, 2, 3, 4]),
            "AQIDBANSvkE51MvG7pNDq4NjmP8SFay7rWsolg//30q7jnApCiuE049JxchapptDh7ryvu/VdvUXYHbwdpa9veVAv14="
        );
    }

    #[test]
    fn test_roundtrip_with_any_salt() {
        for algorithm in [HashingAlgorithm::Sha256, HashingAlgorithm::Sha512] {
            for salt in [[0, 0, 0, 0], [255, 1, 128, 7], [9, 9, 9, 9]] {
                let stored = hash_with_salt("correct horse", algorithm, salt);
                assert!(verify_password(&stored, "correct horse", algorithm));
                assert!(!verify_password(&stored, "battery staple", algorithm));
            }
        }
    }

    #[test]
    fn test_fresh_salt_each_time() {
        let first = hash_password("same", HashingAlgorithm::Sha256);
        let second = hash_password("same", HashingAlgorithm::Sha256);
        assert!(verify_password(&first, "same", HashingAlgorithm::Sha256));
        assert!(verify_password(&second, "same", HashingAlgorithm::Sha256));
        // 32 bits of salt; a collision here is not a realistic outcome.
        assert_ne!(first, second);
    }

    #[test]
    fn test_malformed_stored_value() {
        assert!(!verify_password("not base64!", "x", HashingAlgorithm::Sha256));
        assert!(!verify_password("AQI=", "x", HashingAlgorithm::Sha256));
        assert!(!verify_password("", "", HashingAlgorithm::Sha256));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(
            HashingAlgorithm::from_name("rabbit_password_hashing_sha512").unwrap(),
            HashingAlgorithm::Sha512
        );
        assert_eq!(HashingAlgorithm::from_name("").unwrap(), HashingAlgorithm::Sha256);
        assert!(matches!(
            HashingAlgorithm::from_name("rabbit_password_hashing_md5"),
            Err(ConvergeError::Configuration(_))
        ));
    }

    #[test]
    fn test_generate_password() {
        let password = generate_password(32);
        assert_eq!(password.len(), 32);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
