//! Status-update feed
//!
//! Users post short text updates. Each update is an `update:<id>` hash map;
//! its id is prepended to the global `updates` list and to the author's
//! `user:<id>:updates` list, and both feeds show the most recent entries.

use tracing::info;

use crate::{
    Error, Result,
    constants::{keys::UPDATES, updates},
    keys::{UpdateId, UserId},
    store::{Batch, Store},
    users::UserDirectory,
};

/// Handle to a posted update
#[derive(Debug, Clone)]
pub struct Update {
    id: UpdateId,
    store: Store,
}

impl Update {
    /// The update's id
    pub fn id(&self) -> UpdateId {
        self.id
    }

    /// The author
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the update does not exist.
    pub fn author(&self) -> Result<UserId> {
        self.store.parse(&self.id.key(), "user_id")
    }

    /// The posted text
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the update does not exist.
    pub fn body(&self) -> Result<String> {
        self.store.require(&self.id.key(), "body")
    }
}

/// Checks an update body and returns it trimmed
///
/// # Errors
///
/// Returns `Error::InvalidUpdate` if the body is blank or too long.
pub fn validate_body(body: &str) -> Result<&str> {
    let body = body.trim();
    if body.is_empty() {
        return Err(Error::InvalidUpdate("update cannot be empty".to_owned()));
    }
    if body.chars().count() > updates::MAX_BODY_LENGTH {
        return Err(Error::InvalidUpdate(format!(
            "update is longer than {} characters",
            updates::MAX_BODY_LENGTH
        )));
    }
    Ok(body)
}

/// Global and per-user update feeds
#[derive(Debug, Clone)]
pub struct Feed {
    store: Store,
    users: UserDirectory,
}

impl Feed {
    /// Creates a feed over the shared store
    pub fn new(store: Store, users: UserDirectory) -> Self {
        Self { store, users }
    }

    /// Posts an update on behalf of `user`
    ///
    /// # Errors
    ///
    /// * `Error::InvalidUpdate` - the body failed validation
    /// * `Error::NotFound` - the user does not exist
    pub fn post(&self, user: UserId, body: &str) -> Result<Update> {
        let body = validate_body(body)?;
        if !self.users.exists(user)? {
            return Err(Error::NotFound(format!("user {user}")));
        }

        let id: UpdateId = self.store.next_id()?;
        let key = id.key();
        let mut batch = Batch::new();
        batch
            .hset(key.as_str(), "id", id)
            .hset(key.as_str(), "user_id", user)
            .hset(key.as_str(), "body", body)
            .lpush(UPDATES, id)
            .lpush(user.relation("updates"), id);
        self.store.execute(&batch)?;

        info!(%id, %user, "update posted");
        Ok(self.get(id))
    }

    /// A handle to the update with `id`, whether or not it exists
    pub fn get(&self, id: UpdateId) -> Update {
        Update {
            id,
            store: self.store.clone(),
        }
    }

    /// The most recent updates from everyone, newest first
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the feed holds something other than ids.
    pub fn latest(&self) -> Result<Vec<Update>> {
        self.recent(UPDATES)
    }

    /// The most recent updates posted by `user`, newest first
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the feed holds something other than ids.
    pub fn of_user(&self, user: UserId) -> Result<Vec<Update>> {
        self.recent(&user.relation("updates"))
    }

    fn recent(&self, key: &str) -> Result<Vec<Update>> {
        Ok(self
            .store
            .list(key, 0, updates::FEED_LAST_INDEX)?
            .into_iter()
            .map(|id| self.get(id))
            .collect())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use itertools::Itertools;

    use super::*;
    use crate::store::memory::MemoryStore;

    fn feed() -> (UserDirectory, Feed) {
        let store = Store::open(MemoryStore::new());
        let users = UserDirectory::new(store.clone());
        (users.clone(), Feed::new(store, users))
    }

    #[test]
    fn test_post_and_read() {
        let (users, feed) = feed();
        let alice = users.create("alice", "H").unwrap().id();

        let update = feed.post(alice, "  first!  ").unwrap();
        assert_eq!(update.id().get(), 1);
        assert_eq!(update.author().unwrap(), alice);
        assert_eq!(update.body().unwrap(), "first!");
    }

    #[test]
    fn test_feeds_are_newest_first() {
        let (users, feed) = feed();
        let alice = users.create("alice", "H").unwrap().id();
        let bob = users.create("bob", "H").unwrap().id();

        feed.post(alice, "a1").unwrap();
        feed.post(bob, "b1").unwrap();
        feed.post(alice, "a2").unwrap();

        let bodies = |updates: Vec<Update>| {
            updates
                .iter()
                .map(|u| u.body().unwrap())
                .collect_vec()
        };
        assert_eq!(bodies(feed.latest().unwrap()), ["a2", "b1", "a1"]);
        assert_eq!(bodies(feed.of_user(alice).unwrap()), ["a2", "a1"]);
        assert_eq!(bodies(feed.of_user(bob).unwrap()), ["b1"]);
    }

    #[test]
    fn test_feed_shows_eleven_entries() {
        let (users, feed) = feed();
        let alice = users.create("alice", "H").unwrap().id();
        for n in 0..15 {
            feed.post(alice, &format!("update {n}")).unwrap();
        }

        let latest = feed.latest().unwrap();
        assert_eq!(latest.len(), 11);
        assert_eq!(latest[0].body().unwrap(), "update 14");
        assert_eq!(feed.of_user(alice).unwrap().len(), 11);
    }

    #[test]
    fn test_post_validation() {
        let (users, feed) = feed();
        let alice = users.create("alice", "H").unwrap().id();

        assert!(matches!(
            feed.post(alice, "   "),
            Err(Error::InvalidUpdate(_))
        ));
        assert!(matches!(
            feed.post(alice, &"x".repeat(281)),
            Err(Error::InvalidUpdate(_))
        ));
        assert!(feed.post(alice, &"x".repeat(280)).is_ok());
        assert!(matches!(
            feed.post(UserId::new(9), "hello"),
            Err(Error::NotFound(_))
        ));
        assert_eq!(feed.latest().unwrap().len(), 1);
    }
}
