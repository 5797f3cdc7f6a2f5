//! # Davy
//!
//! The data layer of a quiz service, built directly on a key-value store.
//!
//! Users register, answer multiple-choice questions for points, gather in
//! short-lived lobbies joined by a code and compete on a global leaderboard.
//! Every entity lives in hash maps, sets, sorted sets, counters and lists of
//! a shared [`store::Backend`]; uniqueness and membership invariants are kept
//! through secondary indexes and batched writes rather than relational
//! constraints.
//!
//! [`service::Quiz`] wires the components together; each component can also
//! be used on its own with a [`store::Store`] handle.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]
#![allow(clippy::module_name_repetitions)]
use derive_where::derive_where;
use itertools::Itertools;
use serde::Serialize;

pub mod code;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod keys;
pub mod leaderboard;
pub mod lobby;
pub mod progression;
pub mod questions;
pub mod service;
pub mod store;
pub mod updates;
pub mod users;

pub use error::{Error, Result};
pub use service::Quiz;

/// The first entries of a longer ranking, together with its full length
///
/// Paged views such as the top of the leaderboard return only a prefix of
/// the ranked users but still report how many users are ranked.
#[derive(Debug, Clone, Serialize)]
#[derive_where(Default)]
pub struct TruncatedVec<T> {
    /// Length of the full ranking
    exact_count: usize,
    /// At most `limit` leading entries
    items: Vec<T>,
}

impl<T> TruncatedVec<T> {
    /// Keeps the first `limit` entries of `list`
    ///
    /// `exact_count` is the length of the full ranking, which may exceed
    /// both `limit` and the length of `list`.
    pub fn new<I: Iterator<Item = T>>(list: I, limit: usize, exact_count: usize) -> Self {
        let items = list.take(limit).collect_vec();
        Self { exact_count, items }
    }

    /// Length of the full ranking
    pub fn exact_count(&self) -> usize {
        self.exact_count
    }

    /// The kept entries
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_vec_keeps_prefix() {
        let scores = [90, 75, 75, 40, 12];
        let top = TruncatedVec::new(scores.into_iter(), 3, scores.len());

        assert_eq!(top.exact_count(), 5);
        assert_eq!(top.items(), [90, 75, 75]);
    }

    #[test]
    fn test_truncated_vec_short_ranking() {
        let top = TruncatedVec::new([7, 3].into_iter(), 25, 2);

        assert_eq!(top.exact_count(), 2);
        assert_eq!(top.items(), [7, 3]);
    }

    #[test]
    fn test_truncated_vec_default_is_empty() {
        let truncated = TruncatedVec::<String>::default();
        assert_eq!(truncated.exact_count(), 0);
        assert!(truncated.items().is_empty());
    }

    #[test]
    fn test_truncated_vec_serialization() {
        let truncated = TruncatedVec::new(["alice"].into_iter(), 10, 4);
        assert_eq!(
            serde_json::to_string(&truncated).unwrap(),
            r#"{"exact_count":4,"items":["alice"]}"#
        );
    }
}
