//! Key-value backend abstraction
//!
//! The data layer is built on primitive key-value operations: hash maps,
//! sets, sorted sets, counters and lists. This module defines the operations
//! a backend must offer ([`Backend`]), the two ways of submitting writes
//! ([`Batch`] and [`Transaction`]) and the [`Store`] handle every component
//! receives.
//!
//! A [`Batch`] is sent in one call and fails as a whole only with respect to
//! transport: it is not isolated from concurrent batches touching the same
//! keys. A [`Transaction`] adds guards on hash fields and is applied only if
//! every guard still holds, which lets callers build optimistic retry loops.

use std::{
    fmt::Debug,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::{debug, trace};

use crate::{
    Error, Result,
    keys::{Id, Kind},
};

pub mod memory;

/// Direction of a sorted-set query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Lowest score first
    Ascending,
    /// Highest score first
    Descending,
}

/// A single write inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Set a field of a hash map
    HSet {
        /// Hash key
        key: String,
        /// Field name
        field: String,
        /// New value
        value: String,
    },
    /// Add a member to a set
    SAdd {
        /// Set key
        key: String,
        /// Member to add
        member: String,
    },
    /// Remove a member from a set
    SRem {
        /// Set key
        key: String,
        /// Member to remove
        member: String,
    },
    /// Prepend a value to a list
    LPush {
        /// List key
        key: String,
        /// Value to prepend
        value: String,
    },
    /// Insert or overwrite a member's score in a sorted set
    ZAdd {
        /// Sorted-set key
        key: String,
        /// Member to score
        member: String,
        /// New score
        score: i64,
    },
}

/// Precondition of a [`Transaction`]: a hash field holds an expected value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    /// Hash key
    pub key: String,
    /// Field name
    pub field: String,
    /// Expected value, `None` meaning the field must be absent
    pub expected: Option<String>,
}

/// Operations a key-value backend provides
///
/// Implementations talk to a single shared store. Every call is a potential
/// network round trip and may fail with `Error::BackendUnavailable`; none of
/// them retry internally.
pub trait Backend: Send + Sync {
    /// Atomically increments a counter, starting from zero, and returns the new value
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` on transport failure.
    fn incr(&self, key: &str) -> Result<i64>;

    /// Reads a hash field
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` on transport failure.
    fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Checks whether a hash field exists
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` on transport failure.
    fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self.hget(key, field)?.is_some())
    }

    /// Checks set membership
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` on transport failure.
    fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    /// Lists every member of a set, empty if the key does not exist
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` on transport failure.
    fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Zero-based rank of a member in the given order
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` on transport failure.
    fn zrank(&self, key: &str, member: &str, order: Order) -> Result<Option<u64>>;

    /// Number of members in a sorted set, zero if the key does not exist
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` on transport failure.
    fn zcard(&self, key: &str) -> Result<u64>;

    /// Members and scores between two ranks, inclusive
    ///
    /// Negative indices count from the end; out-of-range slices are clamped
    /// to the available elements.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` on transport failure.
    fn zrange(&self, key: &str, start: i64, stop: i64, order: Order)
    -> Result<Vec<(String, i64)>>;

    /// List elements between two indices, inclusive, with the same index
    /// rules as [`Backend::zrange`]
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` on transport failure.
    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Applies a batch of writes sent together
    ///
    /// # Errors
    ///
    /// Returns a single `Error::BackendUnavailable` if the batch could not
    /// be delivered.
    fn execute(&self, ops: &[Op]) -> Result<()>;

    /// Applies a batch of writes only if every guard holds, atomically
    ///
    /// Returns `false` without writing anything if a guard failed.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` on transport failure.
    fn execute_if(&self, guards: &[Guard], ops: &[Op]) -> Result<bool>;

    /// Releases the backend's resources; later calls fail
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` if the backend could not shut down
    /// cleanly.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A list of writes submitted together with no isolation guarantee
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    /// Creates an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a hash-field write
    pub fn hset(&mut self, key: impl Into<String>, field: &str, value: impl ToString) -> &mut Self {
        self.ops.push(Op::HSet {
            key: key.into(),
            field: field.to_owned(),
            value: value.to_string(),
        });
        self
    }

    /// Queues a set insertion
    pub fn sadd(&mut self, key: impl Into<String>, member: impl ToString) -> &mut Self {
        self.ops.push(Op::SAdd {
            key: key.into(),
            member: member.to_string(),
        });
        self
    }

    /// Queues a set removal
    pub fn srem(&mut self, key: impl Into<String>, member: impl ToString) -> &mut Self {
        self.ops.push(Op::SRem {
            key: key.into(),
            member: member.to_string(),
        });
        self
    }

    /// Queues a list prepend
    pub fn lpush(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.ops.push(Op::LPush {
            key: key.into(),
            value: value.to_string(),
        });
        self
    }

    /// Queues a sorted-set upsert
    pub fn zadd(&mut self, key: impl Into<String>, member: impl ToString, score: i64) -> &mut Self {
        self.ops.push(Op::ZAdd {
            key: key.into(),
            member: member.to_string(),
            score,
        });
        self
    }

    /// The queued operations in submission order
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing has been queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A batch applied only if its guards still hold when it arrives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    guards: Vec<Guard>,
    batch: Batch,
}

/// Result of committing a [`Transaction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every guard held and the writes were applied
    Committed,
    /// A guard failed and nothing was written
    Conflict,
}

impl Transaction {
    /// Wraps a batch with no guards yet
    pub fn new(batch: Batch) -> Self {
        Self {
            guards: Vec::new(),
            batch,
        }
    }

    /// Requires a hash field to hold `expected` (or be absent for `None`)
    #[must_use]
    pub fn guard(mut self, key: impl Into<String>, field: &str, expected: Option<String>) -> Self {
        self.guards.push(Guard {
            key: key.into(),
            field: field.to_owned(),
            expected,
        });
        self
    }

    /// The guards checked before applying the batch
    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    /// The writes applied once the guards hold
    pub fn batch(&self) -> &Batch {
        &self.batch
    }
}

/// Shared flag letting a caller abandon in-flight work
///
/// Clones observe the same flag. Once cancelled, every store call made
/// through a handle carrying the token fails with `Error::Cancelled` before
/// reaching the backend.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation to every holder of the token
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been signalled
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to the shared backend passed explicitly to every component
///
/// Cloning is cheap and every clone talks to the same backend.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
    cancel: CancelToken,
}

impl Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens a handle over a backend
    pub fn open<B: Backend + 'static>(backend: B) -> Self {
        debug!("opening store");
        Self {
            backend: Arc::new(backend),
            cancel: CancelToken::new(),
        }
    }

    /// A handle to the same backend whose calls observe `cancel`
    #[must_use]
    pub fn with_cancel(&self, cancel: CancelToken) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            cancel,
        }
    }

    /// Tears the backend down; every handle fails afterwards
    ///
    /// # Errors
    ///
    /// Propagates the backend's shutdown failure.
    pub fn close(&self) -> Result<()> {
        debug!("closing store");
        self.backend.close()
    }

    fn backend(&self) -> Result<&dyn Backend> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(self.backend.as_ref())
    }

    /// Allocates the next id of an entity kind
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` or `Error::BackendUnavailable`.
    pub fn next_id<K: Kind>(&self) -> Result<Id<K>> {
        self.backend()?
            .incr(&K::ENTITY.counter())
            .map(Id::new)
    }

    /// Reads a hash field that may be absent
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` or `Error::BackendUnavailable`.
    pub fn field(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.backend()?.hget(key, field)
    }

    /// Reads a hash field that must be present
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` naming the key and field if it is absent.
    pub fn require(&self, key: &str, field: &str) -> Result<String> {
        self.field(key, field)?
            .ok_or_else(|| Error::NotFound(format!("{key} {field}")))
    }

    /// Reads and parses a hash field that must be present
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the field is absent and `Error::Decode`
    /// if it does not parse.
    pub fn parse<T: FromStr>(&self, key: &str, field: &str) -> Result<T> {
        let raw = self.require(key, field)?;
        raw.parse()
            .map_err(|_| Error::Decode(format!("{key} {field}: {raw:?}")))
    }

    /// Checks whether a hash field exists
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` or `Error::BackendUnavailable`.
    pub fn exists(&self, key: &str, field: &str) -> Result<bool> {
        self.backend()?.hexists(key, field)
    }

    /// Checks set membership
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` or `Error::BackendUnavailable`.
    pub fn is_member(&self, key: &str, member: impl ToString) -> Result<bool> {
        self.backend()?.sismember(key, &member.to_string())
    }

    /// Lists a set of ids in the order the backend reports them
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if a member is not an id.
    pub fn members<K>(&self, key: &str) -> Result<Vec<Id<K>>> {
        decode_ids(key, self.backend()?.smembers(key)?)
    }

    /// Lists a range of ids from a list, empty if the key does not exist
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if an element is not an id.
    pub fn list<K>(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Id<K>>> {
        decode_ids(key, self.backend()?.lrange(key, start, stop)?)
    }

    /// Zero-based rank of a member in a sorted set
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` or `Error::BackendUnavailable`.
    pub fn rank(&self, key: &str, member: impl ToString, order: Order) -> Result<Option<u64>> {
        self.backend()?.zrank(key, &member.to_string(), order)
    }

    /// Number of members in a sorted set
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` or `Error::BackendUnavailable`.
    pub fn cardinality(&self, key: &str) -> Result<u64> {
        self.backend()?.zcard(key)
    }

    /// Ids and scores between two ranks of a sorted set
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if a member is not an id.
    pub fn range<K>(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        order: Order,
    ) -> Result<Vec<(Id<K>, i64)>> {
        self.backend()?
            .zrange(key, start, stop, order)?
            .into_iter()
            .map(|(member, score)| {
                member
                    .parse()
                    .map(|id| (id, score))
                    .map_err(|_| Error::Decode(format!("{key} member {member:?}")))
            })
            .collect()
    }

    /// Sends a batch of writes in one call
    ///
    /// # Errors
    ///
    /// Returns the single error reported for the whole batch.
    pub fn execute(&self, batch: &Batch) -> Result<()> {
        trace!(ops = batch.len(), "executing batch");
        self.backend()?.execute(batch.ops())
    }

    /// Applies a transaction if its guards still hold
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` or `Error::BackendUnavailable`; a failed
    /// guard is reported as `Outcome::Conflict`, not as an error.
    pub fn commit(&self, transaction: &Transaction) -> Result<Outcome> {
        trace!(
            guards = transaction.guards.len(),
            ops = transaction.batch.len(),
            "committing transaction"
        );
        let applied = self
            .backend()?
            .execute_if(&transaction.guards, transaction.batch.ops())?;
        Ok(if applied {
            Outcome::Committed
        } else {
            Outcome::Conflict
        })
    }
}

fn decode_ids<K>(key: &str, raw: Vec<String>) -> Result<Vec<Id<K>>> {
    raw.into_iter()
        .map(|value| {
            value
                .parse()
                .map_err(|_| Error::Decode(format!("{key} element {value:?}")))
        })
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::keys::{QuestionId, UserId, UserKind};
    use memory::MemoryStore;

    #[test]
    fn test_batch_builder() {
        let mut batch = Batch::new();
        batch
            .hset("user:1", "id", 1)
            .sadd("lobby:1:members", UserId::new(1))
            .lpush("questions", 3)
            .zadd("leaderboard", 1, 5);

        assert_eq!(batch.len(), 4);
        assert_eq!(
            batch.ops()[0],
            Op::HSet {
                key: "user:1".to_owned(),
                field: "id".to_owned(),
                value: "1".to_owned(),
            }
        );
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_store_next_id_is_monotonic() {
        let store = Store::open(MemoryStore::new());
        let first: UserId = store.next_id().unwrap();
        let second: UserId = store.next_id().unwrap();
        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 2);

        let question: QuestionId = store.next_id().unwrap();
        assert_eq!(question.get(), 1);
    }

    #[test]
    fn test_store_require_and_parse() {
        let store = Store::open(MemoryStore::new());
        let mut batch = Batch::new();
        batch.hset("user:1", "lobby", -1).hset("user:1", "name", "alice");
        store.execute(&batch).unwrap();

        assert_eq!(store.parse::<i64>("user:1", "lobby").unwrap(), -1);
        assert!(matches!(
            store.require("user:1", "hash"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.parse::<i64>("user:1", "name"),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_store_decodes_ids() {
        let store = Store::open(MemoryStore::new());
        let mut batch = Batch::new();
        batch.sadd("lobby:1:members", 4).sadd("lobby:1:members", "x");
        store.execute(&batch).unwrap();

        assert!(matches!(
            store.members::<UserKind>("lobby:1:members"),
            Err(Error::Decode(_))
        ));
        assert!(store.list::<UserKind>("missing", 0, -1).unwrap().is_empty());
    }

    #[test]
    fn test_store_cancellation() {
        let store = Store::open(MemoryStore::new());
        let token = CancelToken::new();
        let scoped = store.with_cancel(token.clone());

        assert!(scoped.next_id::<UserKind>().is_ok());
        token.cancel();
        assert_eq!(scoped.next_id::<UserKind>(), Err(Error::Cancelled));
        assert_eq!(scoped.execute(&Batch::new()), Err(Error::Cancelled));

        // handles without the token are unaffected
        assert!(store.next_id::<UserKind>().is_ok());
    }

    #[test]
    fn test_store_commit_conflict() {
        let store = Store::open(MemoryStore::new());
        let mut batch = Batch::new();
        batch.hset("user-question:1", "points", 0);
        store.execute(&batch).unwrap();

        let mut update = Batch::new();
        update.hset("user-question:1", "points", 1);

        let stale = Transaction::new(update.clone()).guard(
            "user-question:1",
            "points",
            Some("5".to_owned()),
        );
        assert_eq!(store.commit(&stale).unwrap(), Outcome::Conflict);
        assert_eq!(store.parse::<i64>("user-question:1", "points").unwrap(), 0);

        let fresh =
            Transaction::new(update).guard("user-question:1", "points", Some("0".to_owned()));
        assert_eq!(store.commit(&fresh).unwrap(), Outcome::Committed);
        assert_eq!(store.parse::<i64>("user-question:1", "points").unwrap(), 1);
    }

    #[test]
    fn test_store_close() {
        let store = Store::open(MemoryStore::new());
        let other = store.clone();
        store.close().unwrap();
        assert!(matches!(
            other.next_id::<UserKind>(),
            Err(Error::BackendUnavailable(_))
        ));
    }
}
