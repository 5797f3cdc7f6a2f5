//! Password hashing
//!
//! Hashing lives behind the [`PasswordHasher`] trait so the user directory
//! only stores and compares opaque hashes.

use crate::{Error, Result, constants::credentials};

/// Produces and verifies password hashes
pub trait PasswordHasher: Send + Sync {
    /// Hashes a plaintext password
    ///
    /// # Errors
    ///
    /// Returns `Error::Hashing` if the hasher fails.
    fn hash(&self, password: &str) -> Result<String>;

    /// Checks a plaintext password against a stored hash
    ///
    /// Returns `Ok(false)` on mismatch.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the stored hash is malformed.
    fn verify(&self, password: &str, hash: &str) -> Result<bool>;
}

/// bcrypt with a configurable cost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bcrypt {
    cost: u32,
}

impl Bcrypt {
    /// Creates a hasher, clamping `cost` to the range bcrypt accepts
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(credentials::MIN_COST, credentials::MAX_COST),
        }
    }

    /// The cost new hashes are produced with
    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl Default for Bcrypt {
    fn default() -> Self {
        Self::new(credentials::DEFAULT_COST)
    }
}

impl PasswordHasher for Bcrypt {
    fn hash(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.cost).map_err(|e| Error::Hashing(e.to_string()))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        bcrypt::verify(password, hash).map_err(|e| Error::Decode(format!("password hash: {e}")))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_bcrypt_roundtrip() {
        let hasher = Bcrypt::new(credentials::MIN_COST);
        let hash = hasher.hash("hunter2").unwrap();
        assert_ne!(hash, "hunter2");
        assert!(hasher.verify("hunter2", &hash).unwrap());
        assert!(!hasher.verify("hunter3", &hash).unwrap());
    }

    #[test]
    fn test_bcrypt_cost_is_clamped() {
        assert_eq!(Bcrypt::new(1).cost(), credentials::MIN_COST);
        assert_eq!(Bcrypt::new(99).cost(), credentials::MAX_COST);
        assert_eq!(Bcrypt::default().cost(), credentials::DEFAULT_COST);
    }

    #[test]
    fn test_bcrypt_malformed_hash() {
        let hasher = Bcrypt::new(credentials::MIN_COST);
        assert!(matches!(
            hasher.verify("hunter2", "not-a-hash"),
            Err(Error::Decode(_))
        ));
    }
}
