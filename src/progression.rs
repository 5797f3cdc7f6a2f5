//! Quiz progression
//!
//! Every user owns one `user-question:<id>` record holding the question they
//! are currently answering and the points they have accumulated. The
//! `user-question:by-user` index maps a user id to that record.
//!
//! Questions already served to a user are logged in `user:<id>:questions`,
//! while every question handed out after a correct answer is prepended to
//! the global `questions` list. The questions a user has not seen yet are
//! the global list minus the served list, matched one occurrence at a time.

use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    Error, Result,
    code::Entropy,
    config::{Concurrency, Options},
    constants::keys::QUESTIONS,
    keys::{Entity, QuestionId, UserId, UserQuestionId},
    questions::{Question, QuestionBank, served_key},
    store::{Batch, Outcome, Store, Transaction},
    users::UserDirectory,
};

/// Result of submitting a choice for the current question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// The choice matched and the user moved on to `next`
    Correct {
        /// Points after the increment
        points: i64,
        /// The question now awaiting an answer
        next: QuestionId,
    },
    /// The choice did not match; nothing changed
    Incorrect,
}

/// Removes one catalog entry per served id, scrambling the remaining order
///
/// For each served id the first equal entry of the catalog is swapped with
/// the last entry and popped, so repeated ids in the catalog are matched one
/// at a time.
pub fn subtract(mut catalog: Vec<QuestionId>, served: &[QuestionId]) -> Vec<QuestionId> {
    for id in served {
        if let Some(position) = catalog.iter().position(|entry| entry == id) {
            catalog.swap_remove(position);
        }
    }
    catalog
}

/// Distinct catalog ids that never appear in the served list
fn exclude(catalog: Vec<QuestionId>, served: &[QuestionId]) -> Vec<QuestionId> {
    catalog
        .into_iter()
        .unique()
        .filter(|id| !served.contains(id))
        .collect()
}

/// Per-user quiz state machine
#[derive(Debug, Clone)]
pub struct Progression {
    store: Store,
    questions: QuestionBank,
    users: UserDirectory,
    entropy: Entropy,
    bootstrap: QuestionId,
    concurrency: Concurrency,
    strict_serving: bool,
}

impl Progression {
    /// Creates the engine over the shared store
    pub fn new(
        store: Store,
        questions: QuestionBank,
        users: UserDirectory,
        entropy: Entropy,
        options: &Options,
    ) -> Self {
        Self {
            store,
            questions,
            users,
            entropy,
            bootstrap: QuestionId::new(options.bootstrap_question),
            concurrency: options.concurrency,
            strict_serving: options.strict_serving,
        }
    }

    /// The id of the user's progression record
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the user was never initialized.
    pub fn record(&self, user: UserId) -> Result<UserQuestionId> {
        let index = Entity::UserQuestion.index("user");
        self.store
            .parse(&index, &user.to_string())
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("progression of user {user}")),
                other => other,
            })
    }

    /// Creates the user's progression record, starting on the bootstrap
    /// question with zero points
    ///
    /// The bootstrap question is logged as served to the user but is not
    /// added to the global question list.
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - the user does not exist
    /// * `Error::AlreadyInitialized` - the user already has a record
    pub fn initialize(&self, user: UserId) -> Result<UserQuestionId> {
        if !self.users.exists(user)? {
            return Err(Error::NotFound(format!("user {user}")));
        }
        let index = Entity::UserQuestion.index("user");
        if self.store.exists(&index, &user.to_string())? {
            return Err(Error::AlreadyInitialized);
        }

        let id: UserQuestionId = self.store.next_id()?;
        let key = id.key();
        let mut batch = Batch::new();
        batch
            .hset(key.as_str(), "id", id)
            .hset(key.as_str(), "user_id", user)
            .hset(key.as_str(), "question_id", self.bootstrap)
            .hset(key.as_str(), "points", 0)
            .hset(key.as_str(), "rank", 0)
            .hset(index, &user.to_string(), id)
            .lpush(served_key(user), self.bootstrap);
        self.store.execute(&batch)?;

        info!(%user, record = %id, "progression initialized");
        Ok(id)
    }

    /// Points accumulated by the user
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the user has no progression record.
    pub fn points(&self, user: UserId) -> Result<i64> {
        self.store.parse(&self.record(user)?.key(), "points")
    }

    /// The question the user is currently answering
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the user has no progression record.
    pub fn current_question(&self, user: UserId) -> Result<Question> {
        let id: QuestionId = self.store.parse(&self.record(user)?.key(), "question_id")?;
        debug!(%user, question = %id, "resolved current question");
        Ok(self.questions.get(id))
    }

    /// Ids logged as served to the user, newest first
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the served list is corrupt.
    pub fn served(&self, user: UserId) -> Result<Vec<QuestionId>> {
        self.questions.served(user)
    }

    /// Question ids the user has not been served, in no particular order
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if either list is corrupt.
    pub fn unanswered_questions(&self, user: UserId) -> Result<Vec<QuestionId>> {
        let catalog = self.questions.catalog()?;
        let served = self.served(user)?;
        Ok(if self.strict_serving {
            exclude(catalog, &served)
        } else {
            subtract(catalog, &served)
        })
    }

    /// Checks a choice against the current question and advances on a match
    ///
    /// A correct choice adds one point and moves the user to a uniformly
    /// random unanswered question, which is prepended to the global question
    /// list. An incorrect choice changes nothing.
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - the user has no record or the current question
    ///   is missing
    /// * `Error::ExhaustedQuestions` - the choice was correct but no
    ///   unanswered question remains
    /// * `Error::PointsOverflow` - the stored total is already `i64::MAX`
    /// * `Error::Conflict` - optimistic writes lost every attempt
    pub fn confirm_answer(&self, user: UserId, choice: &str) -> Result<Verdict> {
        let key = self.record(user)?.key();

        for attempt in 1..=self.attempts() {
            let current: QuestionId = self.store.parse(&key, "question_id")?;
            if self.questions.get(current).answer()? != choice {
                debug!(%user, question = %current, "incorrect answer");
                return Ok(Verdict::Incorrect);
            }

            let unanswered = self.unanswered_questions(user)?;
            let next = self
                .entropy
                .index(unanswered.len())
                .map(|i| unanswered[i])
                .ok_or(Error::ExhaustedQuestions)?;
            let points: i64 = self.store.parse(&key, "points")?;
            let total = points.checked_add(1).ok_or(Error::PointsOverflow)?;

            let mut batch = Batch::new();
            batch
                .hset(key.as_str(), "points", total)
                .hset(key.as_str(), "question_id", next)
                .lpush(QUESTIONS, next);
            if self.strict_serving {
                batch.lpush(served_key(user), next);
            }
            let transaction = Transaction::new(batch)
                .guard(key.as_str(), "points", Some(points.to_string()))
                .guard(key.as_str(), "question_id", Some(current.to_string()));

            match self.submit(&transaction)? {
                Outcome::Committed => {
                    info!(%user, points = total, %next, "correct answer");
                    return Ok(Verdict::Correct {
                        points: total,
                        next,
                    });
                }
                Outcome::Conflict => warn!(%user, attempt, "answer raced another update"),
            }
        }
        Err(Error::Conflict)
    }

    /// Adds `delta` to the user's points and returns the new total
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - the user has no progression record
    /// * `Error::PointsOverflow` - the new total does not fit in an `i64`
    /// * `Error::Conflict` - optimistic writes lost every attempt
    pub fn add_points(&self, user: UserId, delta: i64) -> Result<i64> {
        let key = self.record(user)?.key();

        for attempt in 1..=self.attempts() {
            let points: i64 = self.store.parse(&key, "points")?;
            let total = points.checked_add(delta).ok_or(Error::PointsOverflow)?;

            let mut batch = Batch::new();
            batch.hset(key.as_str(), "points", total);
            let transaction =
                Transaction::new(batch).guard(key.as_str(), "points", Some(points.to_string()));

            match self.submit(&transaction)? {
                Outcome::Committed => {
                    debug!(%user, total, "points added");
                    return Ok(total);
                }
                Outcome::Conflict => warn!(%user, attempt, "point update raced another update"),
            }
        }
        Err(Error::Conflict)
    }

    fn attempts(&self) -> u32 {
        match self.concurrency {
            Concurrency::Batched => 1,
            Concurrency::Optimistic { attempts } => attempts,
        }
    }

    /// Sends the writes, checking the guards only under optimistic concurrency
    fn submit(&self, transaction: &Transaction) -> Result<Outcome> {
        match self.concurrency {
            Concurrency::Batched => {
                self.store.execute(transaction.batch())?;
                Ok(Outcome::Committed)
            }
            Concurrency::Optimistic { .. } => self.store.commit(transaction),
        }
    }
}
