//! User directory
//!
//! Users are stored as `user:<id>` hash maps holding the username, the
//! password hash and a pointer to the lobby the user is in (`-1` for none).
//! Username uniqueness is enforced through the `user:by-username` index.

use std::sync::Arc;

use rustrict::CensorStr;
use tracing::{debug, info};

use crate::{
    Error, Result,
    constants::{keys::NONE, user},
    credentials::{Bcrypt, PasswordHasher},
    keys::{Entity, LobbyId, UserId},
    store::{Batch, Store},
};

/// Handle to a user record
///
/// Creating a handle never touches the backend; each accessor reads one
/// field and reports `Error::NotFound` if the record is absent.
#[derive(Debug, Clone)]
pub struct User {
    id: UserId,
    store: Store,
}

impl User {
    /// The user's id
    pub fn id(&self) -> UserId {
        self.id
    }

    /// The registered username
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no such user exists.
    pub fn username(&self) -> Result<String> {
        self.store.require(&self.id.key(), "username")
    }

    /// The stored password hash
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no such user exists.
    pub fn hash(&self) -> Result<String> {
        self.store.require(&self.id.key(), "hash")
    }

    /// The lobby the user currently points at, `None` if none
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no such user exists and `Error::Decode`
    /// if the pointer is corrupt.
    pub fn lobby_pointer(&self) -> Result<Option<LobbyId>> {
        let raw: i64 = self.store.parse(&self.id.key(), "lobby")?;
        Ok((raw >= 0).then(|| LobbyId::new(raw)))
    }

    /// The lobby the user is in
    ///
    /// # Errors
    ///
    /// Returns `Error::UserNotInLobby` if the pointer is cleared.
    pub fn lobby(&self) -> Result<LobbyId> {
        self.lobby_pointer()?.ok_or(Error::UserNotInLobby)
    }
}

/// Validates a requested username and returns it trimmed
///
/// # Errors
///
/// Returns `Error::InvalidUsername` if the name is too short or too long,
/// contains characters other than ASCII letters, digits, `-` and `_`, or is
/// inappropriate.
pub fn validate_username(username: &str) -> Result<&str> {
    let username = username.trim();
    let length = username.chars().count();
    if length < user::MIN_USERNAME_LENGTH {
        return Err(Error::InvalidUsername("username is too short".to_owned()));
    }
    if length > user::MAX_USERNAME_LENGTH {
        return Err(Error::InvalidUsername("username is too long".to_owned()));
    }
    if let Some(c) = username
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(Error::InvalidUsername(format!(
            "username cannot contain {c:?}"
        )));
    }
    if username.is_inappropriate() {
        return Err(Error::InvalidUsername("username is inappropriate".to_owned()));
    }
    Ok(username)
}

/// Registry of users backed by the shared store
#[derive(Clone)]
pub struct UserDirectory {
    store: Store,
    hasher: Arc<dyn PasswordHasher>,
}

impl std::fmt::Debug for UserDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDirectory")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl UserDirectory {
    /// Creates a directory that verifies passwords with bcrypt
    pub fn new(store: Store) -> Self {
        Self::with_hasher(store, Arc::new(Bcrypt::default()))
    }

    /// Creates a directory with a specific password hasher
    pub fn with_hasher(store: Store, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { store, hasher }
    }

    /// The hasher used to verify passwords
    pub fn hasher(&self) -> &dyn PasswordHasher {
        self.hasher.as_ref()
    }

    /// Registers a new user with an already hashed password
    ///
    /// The username is trimmed before it is checked and stored. The new user
    /// starts outside of any lobby.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidUsername` - the name failed validation
    /// * `Error::DuplicateUsername` - the name is already registered
    /// * `Error::BackendUnavailable` - the store could not be reached
    pub fn create(&self, username: &str, hash: &str) -> Result<User> {
        let username = validate_username(username)?;
        let index = Entity::User.index("username");
        if self.store.exists(&index, username)? {
            return Err(Error::DuplicateUsername);
        }

        let id: UserId = self.store.next_id()?;
        let key = id.key();
        let mut batch = Batch::new();
        batch
            .hset(key.as_str(), "id", id)
            .hset(key.as_str(), "username", username)
            .hset(key.as_str(), "hash", hash)
            .hset(key.as_str(), "lobby", NONE)
            .hset(index, username, id);
        self.store.execute(&batch)?;

        info!(%id, username, "user created");
        Ok(self.get_by_id(id))
    }

    /// Resolves a username to its user
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the username is not registered and
    /// `Error::Decode` if the index entry is corrupt.
    pub fn get_by_username(&self, username: &str) -> Result<User> {
        let index = Entity::User.index("username");
        let id: UserId = self
            .store
            .parse(&index, username)
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("user {username:?}")),
                other => other,
            })?;
        debug!(%id, username, "resolved user");
        Ok(self.get_by_id(id))
    }

    /// A handle to the user with `id`, whether or not it exists
    pub fn get_by_id(&self, id: UserId) -> User {
        User {
            id,
            store: self.store.clone(),
        }
    }

    /// Whether a user with `id` is registered
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` if the store could not be reached.
    pub fn exists(&self, id: UserId) -> Result<bool> {
        Ok(self
            .store
            .field(&id.key(), "username")?
            .is_some_and(|username| !username.is_empty()))
    }

    /// Checks a login attempt
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - the username is not registered
    /// * `Error::InvalidCredentials` - the password does not match
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let user = self.get_by_username(username)?;
        if !self.hasher.verify(password, &user.hash()?)? {
            return Err(Error::InvalidCredentials);
        }
        Ok(user)
    }
}
