//! Runtime options for the quiz data layer
//!
//! Options are deserialized from JSON (every field has a default) and then
//! validated, so a partially specified document is enough to configure the
//! service.

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    constants::{credentials, leaderboard, lobby, progression},
};

/// What happens to a lobby when its host leaves and nobody remains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VacancyPolicy {
    /// Clear the host field and leave the status untouched
    Hostless,
    /// Clear the host field and mark the lobby as ended
    #[default]
    End,
}

/// How multi-key updates of the progression record are submitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub enum Concurrency {
    /// Send the writes as one batch with no isolation from other writers
    #[default]
    Batched,
    /// Guard the writes with the value that was read and retry on conflict
    Optimistic {
        /// Attempts before giving up with `Error::Conflict`
        #[garde(range(min = 1, max = progression::MAX_ATTEMPTS))]
        attempts: u32,
    },
}

/// Tunable behaviour of the data layer
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Options {
    /// Length of generated lobby join codes
    #[garde(range(min = lobby::MIN_CODE_LENGTH, max = lobby::MAX_CODE_LENGTH))]
    pub code_length: usize,
    /// Entries returned by the top-ranks query
    #[garde(range(min = 1, max = leaderboard::MAX_TOP_COUNT))]
    pub top_count: usize,
    /// Entries shown on each side of the user in the standings query
    #[garde(range(min = 1, max = leaderboard::MAX_STANDINGS_WINDOW))]
    pub standings_window: usize,
    /// Question id every new user starts on
    #[garde(range(min = 1))]
    pub bootstrap_question: i64,
    /// Resolution for a lobby left without members
    #[garde(skip)]
    pub vacancy: VacancyPolicy,
    /// Write discipline for point updates and question advancement
    #[garde(dive)]
    pub concurrency: Concurrency,
    /// Record every issued question as served and exclude served questions
    /// by value instead of by multiset subtraction
    #[garde(skip)]
    pub strict_serving: bool,
    /// bcrypt cost used when hashing new passwords
    #[garde(range(min = credentials::MIN_COST, max = credentials::MAX_COST))]
    pub hash_cost: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            code_length: lobby::DEFAULT_CODE_LENGTH,
            top_count: leaderboard::DEFAULT_TOP_COUNT,
            standings_window: leaderboard::DEFAULT_STANDINGS_WINDOW,
            bootstrap_question: progression::BOOTSTRAP_QUESTION,
            vacancy: VacancyPolicy::default(),
            concurrency: Concurrency::default(),
            strict_serving: false,
            hash_cost: credentials::DEFAULT_COST,
        }
    }
}

impl Options {
    /// Parses and validates options from a JSON document
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidOptions` if the document is malformed or any
    /// value falls outside its accepted range.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Options =
            serde_json::from_str(json).map_err(|e| Error::InvalidOptions(e.to_string()))?;
        options.checked()
    }

    /// Validates options built in code
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidOptions` describing the first offending field.
    pub fn checked(self) -> Result<Self> {
        self.validate()
            .map_err(|e| Error::InvalidOptions(e.to_string()))?;
        Ok(self)
    }
}
