//! Password hashing via bcrypt.

use thiserror::Error;

/// bcrypt cost factor.
pub const BCRYPT_COST: u32 = 10;

/// Hasher errors.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("hash: {0}")]
    Hash(String),

    #[error("verify: {0}")]
    Verify(String),
}

/// One-way password hashing with per-record salt.
pub trait SecretHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String, HashError>;

    fn verify(&self, plaintext: &str, hash: &str) -> Result<bool, HashError>;
}

/// bcrypt hasher. The salt is embedded in the output.
#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(BCRYPT_COST)
    }
}

impl SecretHasher for BcryptHasher {
    fn hash(&self, plaintext: &str) -> Result<String, HashError> {
        bcrypt::hash(plaintext, self.cost).map_err(|e| HashError::Hash(format!("bcrypt hash: {e}")))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> Result<bool, HashError> {
        bcrypt::verify(plaintext, hash)
            .map_err(|e| HashError::Verify(format!("bcrypt verify: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hasher = BcryptHasher::new(4);
        let hash = hasher.hash("secret123").unwrap();
        assert_ne!(hash, "secret123");
        assert!(hasher.verify("secret123", &hash).unwrap());
        assert!(!hasher.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn salts_differ() {
        let hasher = BcryptHasher::new(4);
        let a = hasher.hash("secret123").unwrap();
        let b = hasher.hash("secret123").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_is_an_error() {
        let hasher = BcryptHasher::new(4);
        assert!(matches!(
            hasher.verify("secret123", "not-a-hash"),
            Err(HashError::Verify(_))
        ));
    }
}
