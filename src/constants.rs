//! Configuration constants for the quiz data layer
//!
//! This module contains the fixed key names, defaults and validation limits
//! used throughout the crate so that every component agrees on them.

/// Key names that are not derived from an entity id
pub mod keys {
    /// Global question list: both the catalog and the log of issued ids
    pub const QUESTIONS: &str = "questions";
    /// Global status-update feed
    pub const UPDATES: &str = "updates";
    /// Sorted set holding every ranked user
    pub const LEADERBOARD: &str = "leaderboard";
    /// Suffix of the per-entity id counter key
    pub const NEXT_ID: &str = "next-id";
    /// Stored value meaning "no lobby" / "no host"
    pub const NONE: &str = "-1";
}

/// User directory constants
pub mod user {
    /// Minimum username length in characters
    pub const MIN_USERNAME_LENGTH: usize = 3;
    /// Maximum username length in characters
    pub const MAX_USERNAME_LENGTH: usize = 30;
}

/// Lobby constants
pub mod lobby {
    /// Join-code length used when the caller does not pick one
    pub const DEFAULT_CODE_LENGTH: usize = 5;
    /// Shortest join code the options accept
    pub const MIN_CODE_LENGTH: usize = 4;
    /// Longest join code the options accept
    pub const MAX_CODE_LENGTH: usize = 16;
    /// Characters a join code is drawn from
    pub const CODE_ALPHABET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
}

/// Question bank constants
pub mod question {
    /// Maximum length of a question statement in characters
    pub const MAX_STATEMENT_LENGTH: usize = 500;
    /// Minimum number of choices per question
    pub const MIN_CHOICE_COUNT: usize = 2;
    /// Maximum number of choices per question
    pub const MAX_CHOICE_COUNT: usize = 8;
}

/// Quiz progression constants
pub mod progression {
    /// Question every new user starts on
    pub const BOOTSTRAP_QUESTION: i64 = 1;
    /// Maximum attempts an optimistic transaction may be configured with
    pub const MAX_ATTEMPTS: u32 = 16;
}

/// Leaderboard constants
pub mod leaderboard {
    /// Entries returned by the top-ranks query
    pub const DEFAULT_TOP_COUNT: usize = 25;
    /// Largest top-ranks query the options accept
    pub const MAX_TOP_COUNT: usize = 100;
    /// Entries shown above and below the user in the standings query
    pub const DEFAULT_STANDINGS_WINDOW: usize = 12;
    /// Largest standings window the options accept
    pub const MAX_STANDINGS_WINDOW: usize = 50;
}

/// Status-update feed constants
pub mod updates {
    /// Maximum update body length in characters
    pub const MAX_BODY_LENGTH: usize = 280;
    /// Index of the last entry returned by feed queries
    pub const FEED_LAST_INDEX: i64 = 10;
}

/// Password hashing constants
pub mod credentials {
    /// Default bcrypt cost
    pub const DEFAULT_COST: u32 = 10;
    /// Lowest bcrypt cost the hasher accepts
    pub const MIN_COST: u32 = 4;
    /// Highest bcrypt cost the hasher accepts
    pub const MAX_COST: u32 = 31;
}
