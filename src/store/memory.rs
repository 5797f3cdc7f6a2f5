//! In-process backend
//!
//! `MemoryStore` keeps every structure in memory behind one lock and follows
//! the semantics of a Redis server: counters start at zero, `LPUSH`
//! prepends, ranges accept negative indices and clamp out-of-range slices,
//! sorted sets order by score and then by member, and sets report members
//! in insertion order. Clones share the same data, which lets tests keep a
//! handle for fault injection after giving one to a [`Store`](super::Store).

use std::{
    cmp::Ordering,
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use itertools::Itertools;
use parking_lot::Mutex;

use super::{Backend, Guard, Op, Order};
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    counters: HashMap<String, i64>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, Vec<String>>,
    sorted_sets: HashMap<String, HashMap<String, i64>>,
    lists: HashMap<String, VecDeque<String>>,
    unavailable: bool,
    closed: bool,
}

/// Shared in-memory key-value store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (`false`) or regaining (`true`) the connection
    ///
    /// While unavailable every call fails with `Error::BackendUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.inner.lock().unavailable = !available;
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> Result<T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::BackendUnavailable("store is closed".to_owned()));
        }
        if inner.unavailable {
            return Err(Error::BackendUnavailable("connection refused".to_owned()));
        }
        Ok(f(&mut inner))
    }
}

/// Resolves an inclusive, possibly negative, index range over `len` elements
fn clamp_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}

fn by_score(a: &(&String, &i64), b: &(&String, &i64)) -> Ordering {
    a.1.cmp(b.1).then_with(|| a.0.cmp(b.0))
}

impl Inner {
    fn sorted(&self, key: &str, order: Order) -> Vec<(String, i64)> {
        let Some(scores) = self.sorted_sets.get(key) else {
            return Vec::new();
        };
        let ascending = scores.iter().sorted_by(by_score);
        let entries = match order {
            Order::Ascending => ascending.collect_vec(),
            Order::Descending => ascending.rev().collect_vec(),
        };
        entries
            .into_iter()
            .map(|(member, score)| (member.to_owned(), *score))
            .collect()
    }

    fn holds(&self, guard: &Guard) -> bool {
        let actual = self
            .hashes
            .get(&guard.key)
            .and_then(|hash| hash.get(&guard.field));
        actual == guard.expected.as_ref()
    }

    fn apply(&mut self, op: &Op) {
        match op {
            Op::HSet { key, field, value } => {
                self.hashes
                    .entry(key.to_owned())
                    .or_default()
                    .insert(field.to_owned(), value.to_owned());
            }
            Op::SAdd { key, member } => {
                let set = self.sets.entry(key.to_owned()).or_default();
                if !set.contains(member) {
                    set.push(member.to_owned());
                }
            }
            Op::SRem { key, member } => {
                if let Some(set) = self.sets.get_mut(key) {
                    set.retain(|m| m != member);
                }
            }
            Op::LPush { key, value } => {
                self.lists
                    .entry(key.to_owned())
                    .or_default()
                    .push_front(value.to_owned());
            }
            Op::ZAdd { key, member, score } => {
                self.sorted_sets
                    .entry(key.to_owned())
                    .or_default()
                    .insert(member.to_owned(), *score);
            }
        }
    }
}

impl Backend for MemoryStore {
    fn incr(&self, key: &str) -> Result<i64> {
        self.with(|inner| {
            let counter = inner.counters.entry(key.to_owned()).or_default();
            *counter += 1;
            *counter
        })
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.with(|inner| {
            inner
                .hashes
                .get(key)
                .and_then(|hash| hash.get(field))
                .cloned()
        })
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.with(|inner| {
            inner
                .sets
                .get(key)
                .is_some_and(|set| set.iter().any(|m| m == member))
        })
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.with(|inner| inner.sets.get(key).cloned().unwrap_or_default())
    }

    fn zrank(&self, key: &str, member: &str, order: Order) -> Result<Option<u64>> {
        self.with(|inner| {
            inner
                .sorted(key, order)
                .iter()
                .position(|(m, _)| m == member)
                .and_then(|position| u64::try_from(position).ok())
        })
    }

    fn zcard(&self, key: &str) -> Result<u64> {
        self.with(|inner| {
            inner
                .sorted_sets
                .get(key)
                .map_or(0, |scores| scores.len() as u64)
        })
    }

    fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        order: Order,
    ) -> Result<Vec<(String, i64)>> {
        self.with(|inner| {
            let entries = inner.sorted(key, order);
            match clamp_range(entries.len(), start, stop) {
                Some((start, stop)) => entries[start..=stop].to_vec(),
                None => Vec::new(),
            }
        })
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.with(|inner| {
            let Some(list) = inner.lists.get(key) else {
                return Vec::new();
            };
            match clamp_range(list.len(), start, stop) {
                Some((start, stop)) => list.range(start..=stop).cloned().collect(),
                None => Vec::new(),
            }
        })
    }

    fn execute(&self, ops: &[Op]) -> Result<()> {
        self.with(|inner| {
            for op in ops {
                inner.apply(op);
            }
        })
    }

    fn execute_if(&self, guards: &[Guard], ops: &[Op]) -> Result<bool> {
        self.with(|inner| {
            if !guards.iter().all(|guard| inner.holds(guard)) {
                return false;
            }
            for op in ops {
                inner.apply(op);
            }
            true
        })
    }

    fn close(&self) -> Result<()> {
        self.inner.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn push(store: &MemoryStore, key: &str, values: &[&str]) {
        let ops = values
            .iter()
            .map(|v| Op::LPush {
                key: key.to_owned(),
                value: (*v).to_owned(),
            })
            .collect_vec();
        store.execute(&ops).unwrap();
    }

    fn zadd(store: &MemoryStore, key: &str, member: &str, score: i64) {
        store
            .execute(&[Op::ZAdd {
                key: key.to_owned(),
                member: member.to_owned(),
                score,
            }])
            .unwrap();
    }

    #[test]
    fn test_clamp_range() {
        assert_eq!(clamp_range(5, 0, -1), Some((0, 4)));
        assert_eq!(clamp_range(5, 0, 10), Some((0, 4)));
        assert_eq!(clamp_range(5, -2, -1), Some((3, 4)));
        assert_eq!(clamp_range(5, -10, 1), Some((0, 1)));
        assert_eq!(clamp_range(5, 3, 1), None);
        assert_eq!(clamp_range(5, 7, 9), None);
        assert_eq!(clamp_range(0, 0, -1), None);
    }

    #[test]
    fn test_incr_starts_at_one() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("user:next-id").unwrap(), 1);
        assert_eq!(store.incr("user:next-id").unwrap(), 2);
        assert_eq!(store.incr("lobby:next-id").unwrap(), 1);
    }

    #[test]
    fn test_lpush_prepends() {
        let store = MemoryStore::new();
        push(&store, "questions", &["1", "2", "3"]);
        assert_eq!(store.lrange("questions", 0, -1).unwrap(), ["3", "2", "1"]);
        assert_eq!(store.lrange("questions", 0, 0).unwrap(), ["3"]);
        assert!(store.lrange("missing", 0, -1).unwrap().is_empty());
    }

    #[test]
    fn test_sets_keep_insertion_order() {
        let store = MemoryStore::new();
        let ops = ["5", "2", "5", "9"]
            .iter()
            .map(|m| Op::SAdd {
                key: "lobby:1:members".to_owned(),
                member: (*m).to_owned(),
            })
            .collect_vec();
        store.execute(&ops).unwrap();
        assert_eq!(store.smembers("lobby:1:members").unwrap(), ["5", "2", "9"]);

        store
            .execute(&[Op::SRem {
                key: "lobby:1:members".to_owned(),
                member: "5".to_owned(),
            }])
            .unwrap();
        assert_eq!(store.smembers("lobby:1:members").unwrap(), ["2", "9"]);
        assert!(!store.sismember("lobby:1:members", "5").unwrap());
        assert!(store.sismember("lobby:1:members", "9").unwrap());
    }

    #[test]
    fn test_sorted_set_ordering() {
        let store = MemoryStore::new();
        zadd(&store, "leaderboard", "1", 10);
        zadd(&store, "leaderboard", "2", 30);
        zadd(&store, "leaderboard", "3", 20);
        zadd(&store, "leaderboard", "4", 20);

        let descending = store.zrange("leaderboard", 0, -1, Order::Descending).unwrap();
        assert_eq!(
            descending,
            [
                ("2".to_owned(), 30),
                ("4".to_owned(), 20),
                ("3".to_owned(), 20),
                ("1".to_owned(), 10),
            ]
        );
        assert_eq!(store.zrank("leaderboard", "2", Order::Descending).unwrap(), Some(0));
        assert_eq!(store.zrank("leaderboard", "2", Order::Ascending).unwrap(), Some(3));
        assert_eq!(store.zrank("leaderboard", "7", Order::Ascending).unwrap(), None);
        assert_eq!(store.zcard("leaderboard").unwrap(), 4);
        assert_eq!(store.zcard("missing").unwrap(), 0);
    }

    #[test]
    fn test_sorted_set_overwrites_score() {
        let store = MemoryStore::new();
        zadd(&store, "leaderboard", "1", 10);
        zadd(&store, "leaderboard", "2", 5);
        zadd(&store, "leaderboard", "1", 1);
        assert_eq!(store.zrank("leaderboard", "1", Order::Descending).unwrap(), Some(1));
    }

    #[test]
    fn test_execute_if_checks_guards() {
        let store = MemoryStore::new();
        let set = |value: &str| Op::HSet {
            key: "user-question:1".to_owned(),
            field: "points".to_owned(),
            value: value.to_owned(),
        };
        let absent = Guard {
            key: "user-question:1".to_owned(),
            field: "points".to_owned(),
            expected: None,
        };

        assert!(store.execute_if(&[absent.clone()], &[set("0")]).unwrap());
        assert!(!store.execute_if(&[absent], &[set("9")]).unwrap());
        assert_eq!(
            store.hget("user-question:1", "points").unwrap().as_deref(),
            Some("0")
        );
    }

    #[test]
    fn test_unavailable_and_closed() {
        let store = MemoryStore::new();
        let handle = store.clone();

        handle.set_available(false);
        assert!(matches!(
            store.incr("user:next-id"),
            Err(Error::BackendUnavailable(_))
        ));
        handle.set_available(true);
        assert!(store.incr("user:next-id").is_ok());

        store.close().unwrap();
        assert!(matches!(
            handle.hget("user:1", "id"),
            Err(Error::BackendUnavailable(_))
        ));
    }
}
