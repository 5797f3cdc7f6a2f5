//! Leaderboard and standings
//!
//! Scores live in the `leaderboard` sorted set, keyed by user id with the
//! user's latest point total as the score. Writing a score overwrites the
//! previous one, so callers only submit totals that never decrease (for
//! example right after a correct answer).

use serde::Serialize;
use tracing::debug;

use crate::{
    Result, TruncatedVec,
    config::Options,
    constants::keys::LEADERBOARD,
    keys::UserId,
    store::{Batch, Order, Store},
    users::UserDirectory,
};

/// One row of a ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankEntry {
    /// Position in descending score order, starting at 1
    pub rank: u64,
    /// The ranked user
    pub user: UserId,
    /// The user's name at the time of the query
    pub username: String,
    /// The user's recorded points
    pub score: i64,
}

/// Score information for a single user
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ScoreMessage {
    /// Recorded points
    pub points: i64,
    /// Position in the leaderboard (1-indexed)
    pub position: u64,
}

/// Global ranking of users by points
#[derive(Debug, Clone)]
pub struct Leaderboard {
    store: Store,
    users: UserDirectory,
    top_count: usize,
    standings_window: usize,
}

impl Leaderboard {
    /// Creates a leaderboard over the shared store
    pub fn new(store: Store, users: UserDirectory, options: &Options) -> Self {
        Self {
            store,
            users,
            top_count: options.top_count,
            standings_window: options.standings_window,
        }
    }

    /// Records `points` as the user's score, replacing any earlier score
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` if the write could not be sent.
    pub fn update(&self, user: UserId, points: i64) -> Result<()> {
        let mut batch = Batch::new();
        batch.zadd(LEADERBOARD, user, points);
        self.store.execute(&batch)?;
        debug!(%user, points, "leaderboard updated");
        Ok(())
    }

    /// Zero-based position in descending score order, `None` if unranked
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` if the store could not be reached.
    pub fn rank(&self, user: UserId) -> Result<Option<u64>> {
        self.store.rank(LEADERBOARD, user, Order::Descending)
    }

    /// The user's points and 1-based position, `None` if unranked
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` if the store could not be reached.
    pub fn score(&self, user: UserId) -> Result<Option<ScoreMessage>> {
        let Some(rank) = self.rank(user)? else {
            return Ok(None);
        };
        let index = to_index(rank);
        Ok(self
            .store
            .range(LEADERBOARD, index, index, Order::Descending)?
            .into_iter()
            .find(|(id, _)| *id == user)
            .map(|(_, points)| ScoreMessage {
                points,
                position: rank + 1,
            }))
    }

    /// The `count` highest scores, best first
    ///
    /// The result also carries the number of ranked users.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if a ranked user has no record.
    pub fn top(&self, count: usize) -> Result<TruncatedVec<RankEntry>> {
        let total = self.store.cardinality(LEADERBOARD)?;
        if count == 0 {
            return Ok(TruncatedVec::new(std::iter::empty(), 0, total as usize));
        }

        let entries = self
            .store
            .range(LEADERBOARD, 0, to_index(count as u64) - 1, Order::Descending)?
            .into_iter()
            .zip(1..)
            .map(|((user, score), rank)| self.entry(rank, user, score))
            .collect::<Result<Vec<_>>>()?;
        Ok(TruncatedVec::new(entries.into_iter(), count, total as usize))
    }

    /// [`Leaderboard::top`] with the configured page size
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if a ranked user has no record.
    pub fn leaders(&self) -> Result<TruncatedVec<RankEntry>> {
        self.top(self.top_count)
    }

    /// Up to `window` entries on each side of the user, lowest score first
    ///
    /// The window is clamped to the ranked users, so at most `2 * window + 1`
    /// entries come back. Every entry reports its position in descending
    /// order. An unranked user gets no entries.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if a ranked user has no record.
    pub fn standings(&self, user: UserId, window: usize) -> Result<Vec<RankEntry>> {
        let window = window as u64;
        let Some(position) = self.store.rank(LEADERBOARD, user, Order::Ascending)? else {
            return Ok(Vec::new());
        };
        let start = position.saturating_sub(window);
        let stop = position.saturating_add(window);

        let entries: Vec<(UserId, i64)> = self.store.range(
            LEADERBOARD,
            to_index(start),
            to_index(stop),
            Order::Ascending,
        )?;
        // other clients may rank users between the two reads
        let total = self
            .store
            .cardinality(LEADERBOARD)?
            .max(start + entries.len() as u64);

        entries
            .into_iter()
            .zip(start..)
            .map(|((id, score), ascending)| self.entry(total - ascending, id, score))
            .collect()
    }

    /// [`Leaderboard::standings`] with the configured window
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if a ranked user has no record.
    pub fn around(&self, user: UserId) -> Result<Vec<RankEntry>> {
        self.standings(user, self.standings_window)
    }

    fn entry(&self, rank: u64, user: UserId, score: i64) -> Result<RankEntry> {
        Ok(RankEntry {
            rank,
            user,
            username: self.users.get_by_id(user).username()?,
            score,
        })
    }
}

fn to_index(position: u64) -> i64 {
    i64::try_from(position).unwrap_or(i64::MAX)
}
