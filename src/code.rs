//! Random join codes and the shared random source
//!
//! Lobbies are joined by a short random code drawn from letters, digits,
//! `-` and `_`. All randomness in the crate (join codes and next-question
//! selection) comes from an [`Entropy`] handle that is passed in explicitly,
//! so tests can seed it and get reproducible results.

use std::{str::FromStr, sync::Arc};

use parking_lot::Mutex;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

use crate::constants::lobby::{CODE_ALPHABET, MAX_CODE_LENGTH, MIN_CODE_LENGTH};

/// Seedable random source shared by every component of one service
///
/// Clones draw from the same generator.
#[derive(Debug, Clone)]
pub struct Entropy(Arc<Mutex<fastrand::Rng>>);

impl Entropy {
    /// Creates a source seeded from the operating system
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(fastrand::Rng::new())))
    }

    /// Creates a deterministic source
    pub fn seeded(seed: u64) -> Self {
        Self(Arc::new(Mutex::new(fastrand::Rng::with_seed(seed))))
    }

    /// Picks a uniformly random index below `len`, `None` when `len` is zero
    pub fn index(&self, len: usize) -> Option<usize> {
        (len > 0).then(|| self.0.lock().usize(..len))
    }

    fn code(&self, length: usize) -> String {
        let mut rng = self.0.lock();
        (0..length)
            .map(|_| char::from(CODE_ALPHABET[rng.usize(..CODE_ALPHABET.len())]))
            .collect()
    }
}

impl Default for Entropy {
    /// Creates a source seeded from the operating system (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

/// Errors produced when parsing a join code
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The code has no characters
    #[error("join code cannot be empty")]
    Empty,
    /// The code contains a character outside the alphabet
    #[error("join code contains {0:?}")]
    InvalidCharacter(char),
}

/// The code players type to join a lobby
///
/// Codes are case-sensitive and serialize as plain strings.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, SerializeDisplay, DeserializeFromStr,
)]
pub struct JoinCode(String);

impl JoinCode {
    /// Generates a random code of `length` characters
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCodeLength` if `length` is outside the accepted
    /// range.
    pub fn generate(entropy: &Entropy, length: usize) -> crate::Result<Self> {
        Self::check_length(length)?;
        Ok(Self(entropy.code(length)))
    }

    /// Checks that codes of `length` characters may be generated
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCodeLength` outside
    /// `MIN_CODE_LENGTH..=MAX_CODE_LENGTH`.
    pub fn check_length(length: usize) -> crate::Result<()> {
        if (MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&length) {
            Ok(())
        } else {
            Err(crate::Error::InvalidCodeLength(length))
        }
    }

    /// The code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for JoinCode {
    type Err = Error;

    /// Parses a code typed by a player
    ///
    /// # Errors
    ///
    /// Returns `Error::Empty` for an empty string and
    /// `Error::InvalidCharacter` for the first character outside the
    /// alphabet.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::Empty);
        }
        if let Some(c) = s.chars().find(|c| !c.is_ascii() || !CODE_ALPHABET.contains(&(*c as u8))) {
            return Err(Error::InvalidCharacter(c));
        }
        Ok(Self(s.to_owned()))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_generate_length_and_alphabet() {
        let entropy = Entropy::new();
        for length in [MIN_CODE_LENGTH, 5, MAX_CODE_LENGTH] {
            let code = JoinCode::generate(&entropy, length).unwrap();
            assert_eq!(code.as_str().len(), length);
            assert!(code.as_str().bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_generate_is_deterministic_when_seeded() {
        let a = JoinCode::generate(&Entropy::seeded(7), 8).unwrap();
        let b = JoinCode::generate(&Entropy::seeded(7), 8).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_generate_rejects_bad_lengths() {
        let entropy = Entropy::seeded(1);
        for length in [0, MIN_CODE_LENGTH - 1, MAX_CODE_LENGTH + 1] {
            assert_eq!(
                JoinCode::generate(&entropy, length),
                Err(crate::Error::InvalidCodeLength(length))
            );
        }
    }

    #[test]
    fn test_entropy_index() {
        let entropy = Entropy::seeded(3);
        assert_eq!(entropy.index(0), None);
        assert_eq!(entropy.index(1), Some(0));
        for _ in 0..100 {
            assert!(entropy.index(4).is_some_and(|i| i < 4));
        }
    }

    #[test]
    fn test_entropy_clones_share_state() {
        let entropy = Entropy::seeded(11);
        let clone = entropy.clone();
        let first = JoinCode::generate(&entropy, 6).unwrap();
        let second = JoinCode::generate(&clone, 6).unwrap();
        let fresh = Entropy::seeded(11);
        assert_eq!(JoinCode::generate(&fresh, 6).unwrap(), first);
        assert_eq!(JoinCode::generate(&fresh, 6).unwrap(), second);
    }

    #[test]
    fn test_join_code_from_str() {
        assert_eq!(JoinCode::from_str("aB3-_").unwrap().as_str(), "aB3-_");
        assert_eq!(JoinCode::from_str(""), Err(Error::Empty));
        assert_eq!(JoinCode::from_str("ab cd"), Err(Error::InvalidCharacter(' ')));
        assert_eq!(JoinCode::from_str("abé"), Err(Error::InvalidCharacter('é')));
    }

    #[test]
    fn test_join_code_serialization() {
        let code = JoinCode::from_str("Xy-9z").unwrap();
        assert_eq!(code.to_string(), "Xy-9z");
        let serialized = serde_json::to_string(&code).unwrap();
        assert_eq!(serialized, "\"Xy-9z\"");

        let deserialized: JoinCode = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, code);

        assert!(serde_json::from_str::<JoinCode>("\"a b\"").is_err());
    }
}
