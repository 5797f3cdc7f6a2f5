//! Error types shared by every component
//!
//! Each failure condition the data layer can report has its own variant so
//! callers (request handlers, the presentation layer) can match on it
//! explicitly instead of comparing error values.

use serde::Serialize;
use thiserror::Error;

/// Errors produced by the data layer and its backends
#[derive(Error, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An entity, index entry or record field is absent
    #[error("{0} not found")]
    NotFound(String),
    /// The username is already registered
    #[error("username taken")]
    DuplicateUsername,
    /// A question with the same statement already exists
    #[error("question already exists")]
    DuplicateQuestion,
    /// The user already belongs to a lobby
    #[error("user is already in a lobby")]
    UserAlreadyInLobby,
    /// The user does not belong to any lobby
    #[error("user is not in a lobby")]
    UserNotInLobby,
    /// The password does not match the stored hash
    #[error("invalid login")]
    InvalidCredentials,
    /// Every question in the catalog has already been served to the user
    #[error("no unanswered questions remain")]
    ExhaustedQuestions,
    /// A progression record already exists for the user
    #[error("question already given to the current user")]
    AlreadyInitialized,
    /// A stored value could not be decoded
    #[error("could not decode {0}")]
    Decode(String),
    /// The backend could not be reached or rejected the request
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    /// The caller cancelled the operation before it reached the backend
    #[error("operation cancelled")]
    Cancelled,
    /// An optimistic transaction lost every attempt to a concurrent writer
    #[error("conflicting concurrent update")]
    Conflict,
    /// Only the lobby host may perform the operation
    #[error("only the host can do that")]
    NotHost,
    /// Lobby statuses only move forward, and ended lobbies take no members
    #[error("lobby status does not allow that")]
    InvalidStatus,
    /// The requested join-code length is outside the accepted range
    #[error(
        "join codes must be {min} to {max} characters, not {0}",
        min = crate::constants::lobby::MIN_CODE_LENGTH,
        max = crate::constants::lobby::MAX_CODE_LENGTH
    )]
    InvalidCodeLength(usize),
    /// A point total would leave the range of `i64`
    #[error("point total out of range")]
    PointsOverflow,
    /// The username failed validation
    #[error("invalid username: {0}")]
    InvalidUsername(String),
    /// A question record failed validation
    #[error("invalid question: {0}")]
    InvalidQuestion(String),
    /// A status update failed validation
    #[error("invalid update: {0}")]
    InvalidUpdate(String),
    /// The configuration failed validation
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    /// The password hasher failed for a reason other than a mismatch
    #[error("hashing failed: {0}")]
    Hashing(String),
}

/// Result type used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the caller may retry the same call unchanged
    ///
    /// Only transport failures and lost optimistic races qualify; the data
    /// layer itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_) | Error::Conflict)
    }
}
