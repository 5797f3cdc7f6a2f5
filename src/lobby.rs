//! Lobby management
//!
//! A lobby is an ad-hoc group session joined by a random code. It is stored
//! as a `lobby:<id>` hash map (code, host and status), a `lobby:<id>:members`
//! set and a `lobby:by-code` index. Each member's user record points back at
//! the lobby through its `lobby` field.
//!
//! The member set and the members' lobby pointers are independent keys. They
//! are always written together in one batch, but batches are not isolated,
//! so concurrent calls can briefly observe one without the other. Membership
//! checks therefore look at both facts.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    Error, Result,
    code::{Entropy, JoinCode},
    config::{Options, VacancyPolicy},
    constants::{keys::NONE, lobby::DEFAULT_CODE_LENGTH},
    keys::{Entity, LobbyId, UserId},
    store::{Batch, Store},
    users::UserDirectory,
};

/// Codes drawn before giving up on finding an unused one
const CODE_ATTEMPTS: usize = 8;

/// Lifecycle of a lobby
///
/// Statuses only move forward; a lobby is never deleted, it ends.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum LobbyStatus {
    /// Gathering members
    #[default]
    Waiting = 0,
    /// About to start
    Starting = 1,
    /// Quiz in progress
    Ongoing = 2,
    /// Finished or abandoned
    Ended = 3,
}

impl Display for LobbyStatus {
    /// Formats the status as its stored numeric code
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

impl FromStr for LobbyStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Self::Waiting),
            "1" => Ok(Self::Starting),
            "2" => Ok(Self::Ongoing),
            "3" => Ok(Self::Ended),
            other => Err(Error::Decode(format!("lobby status {other:?}"))),
        }
    }
}

/// Handle to a lobby record
#[derive(Debug, Clone)]
pub struct Lobby {
    id: LobbyId,
    store: Store,
    users: UserDirectory,
}

impl Lobby {
    /// The lobby's id
    pub fn id(&self) -> LobbyId {
        self.id
    }

    /// The code used to join the lobby
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the lobby does not exist.
    pub fn code(&self) -> Result<JoinCode> {
        self.store.parse(&self.id.key(), "code")
    }

    /// The current host, `None` once the lobby has been vacated
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the lobby does not exist.
    pub fn host(&self) -> Result<Option<UserId>> {
        let raw: i64 = self.store.parse(&self.id.key(), "host_id")?;
        Ok((raw >= 0).then(|| UserId::new(raw)))
    }

    /// The lobby's status
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the lobby does not exist and
    /// `Error::Decode` for an unknown status code.
    pub fn status(&self) -> Result<LobbyStatus> {
        self.store.parse(&self.id.key(), "status")
    }

    /// Moves the lobby to a later status
    ///
    /// Setting the current status again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStatus` if `status` comes before the current one.
    pub fn set_status(&self, status: LobbyStatus) -> Result<()> {
        let current = self.status()?;
        if status < current {
            return Err(Error::InvalidStatus);
        }
        if status == current {
            return Ok(());
        }
        let mut batch = Batch::new();
        batch.hset(self.id.key(), "status", status);
        self.store.execute(&batch)?;
        info!(lobby = %self.id, ?status, "lobby status changed");
        Ok(())
    }

    /// Whether `user` is in the member set
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` if the store could not be reached.
    pub fn is_member(&self, user: UserId) -> Result<bool> {
        self.store.is_member(&self.members_key(), user)
    }

    /// Every member, in the order the backend reports the set
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the set holds something other than ids.
    pub fn members(&self) -> Result<Vec<UserId>> {
        self.store.members(&self.members_key())
    }

    /// Usernames of every member, in member order
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if a member has no user record.
    pub fn players(&self) -> Result<Vec<String>> {
        self.members()?
            .into_iter()
            .map(|id| self.users.get_by_id(id).username())
            .collect()
    }

    /// Adds a user to the lobby
    ///
    /// # Errors
    ///
    /// * `Error::InvalidStatus` - the lobby has ended
    /// * `Error::UserAlreadyInLobby` - the user is already in the member set
    ///   or already points at any lobby
    /// * `Error::NotFound` - the user does not exist
    pub fn add_member(&self, user: UserId) -> Result<()> {
        if self.status()? == LobbyStatus::Ended {
            return Err(Error::InvalidStatus);
        }
        if self.is_member(user)? {
            return Err(Error::UserAlreadyInLobby);
        }
        match self.users.get_by_id(user).lobby_pointer()? {
            Some(current) if current == self.id => return Err(Error::UserAlreadyInLobby),
            Some(current) => {
                debug!(%user, lobby = %current, "user points at another lobby");
                return Err(Error::UserAlreadyInLobby);
            }
            None => {}
        }

        let mut batch = Batch::new();
        batch
            .hset(user.key(), "lobby", self.id)
            .sadd(self.members_key(), user);
        self.store.execute(&batch)?;

        info!(lobby = %self.id, %user, "member joined");
        Ok(())
    }

    fn members_key(&self) -> String {
        self.id.relation("members")
    }
}

/// Creates lobbies and moves users in and out of them
#[derive(Debug, Clone)]
pub struct LobbyManager {
    store: Store,
    users: UserDirectory,
    entropy: Entropy,
    vacancy: VacancyPolicy,
}

impl LobbyManager {
    /// Creates a manager over the shared store
    ///
    /// # Arguments
    ///
    /// * `store` - Handle to the backend
    /// * `users` - Directory used to read and update lobby pointers
    /// * `entropy` - Random source for join codes
    /// * `vacancy` - What to do with a lobby its last member leaves
    pub fn new(
        store: Store,
        users: UserDirectory,
        entropy: Entropy,
        vacancy: VacancyPolicy,
    ) -> Self {
        Self {
            store,
            users,
            entropy,
            vacancy,
        }
    }

    /// Creates a manager configured from `options`
    pub fn with_options(
        store: Store,
        users: UserDirectory,
        entropy: Entropy,
        options: &Options,
    ) -> Self {
        Self::new(store, users, entropy, options.vacancy)
    }

    /// A handle to the lobby with `id`, whether or not it exists
    pub fn get(&self, id: LobbyId) -> Lobby {
        Lobby {
            id,
            store: self.store.clone(),
            users: self.users.clone(),
        }
    }

    /// Resolves a join code
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no lobby has the code.
    pub fn get_by_code(&self, code: &str) -> Result<Lobby> {
        let index = Entity::Lobby.index("code");
        let id: LobbyId = self.store.parse(&index, code).map_err(|e| match e {
            Error::NotFound(_) => Error::NotFound(format!("lobby code {code:?}")),
            other => other,
        })?;
        Ok(self.get(id))
    }

    /// The lobby a user is currently in
    ///
    /// # Errors
    ///
    /// Returns `Error::UserNotInLobby` if the user's pointer is cleared.
    pub fn of_user(&self, user: UserId) -> Result<Lobby> {
        let id = self.users.get_by_id(user).lobby()?;
        Ok(self.get(id))
    }

    /// Creates a lobby hosted by `host`
    ///
    /// The record, the code index, the host's lobby pointer and the host's
    /// membership are written in one batch.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidCodeLength` - `code_length` is outside
    ///   `MIN_CODE_LENGTH..=MAX_CODE_LENGTH`
    /// * `Error::UserAlreadyInLobby` - the host already points at a lobby
    /// * `Error::NotFound` - the host does not exist
    /// * `Error::Conflict` - no unused join code could be drawn
    pub fn create(&self, host: UserId, code_length: usize) -> Result<Lobby> {
        JoinCode::check_length(code_length)?;
        if self.users.get_by_id(host).lobby_pointer()?.is_some() {
            return Err(Error::UserAlreadyInLobby);
        }

        let id: LobbyId = self.store.next_id()?;
        let index = Entity::Lobby.index("code");
        let code = self.unused_code(&index, code_length)?;

        let key = id.key();
        let mut batch = Batch::new();
        batch
            .hset(key.as_str(), "id", id)
            .hset(key.as_str(), "code", &code)
            .hset(key.as_str(), "host_id", host)
            .hset(key.as_str(), "status", LobbyStatus::Waiting)
            .hset(index, code.as_str(), id)
            .hset(host.key(), "lobby", id)
            .sadd(id.relation("members"), host);
        self.store.execute(&batch)?;

        info!(lobby = %id, %host, %code, "lobby created");
        Ok(self.get(id))
    }

    fn unused_code(&self, index: &str, length: usize) -> Result<JoinCode> {
        for _ in 0..CODE_ATTEMPTS {
            let code = JoinCode::generate(&self.entropy, length)?;
            if !self.store.exists(index, code.as_str())? {
                return Ok(code);
            }
            debug!(%code, "join code collision");
        }
        Err(Error::Conflict)
    }

    /// Joins the lobby identified by `code`
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown code and otherwise whatever
    /// [`Lobby::add_member`] reports.
    pub fn join(&self, code: &str, user: UserId) -> Result<Lobby> {
        let lobby = self.get_by_code(code)?;
        lobby.add_member(user)?;
        Ok(lobby)
    }

    /// Joins by code when `choice` is `"join"`, otherwise creates a lobby
    /// with the default code length
    ///
    /// # Errors
    ///
    /// Propagates the error of the chosen operation unchanged.
    pub fn join_or_create(&self, choice: &str, code: &str, user: UserId) -> Result<Lobby> {
        if choice == "join" {
            self.join(code, user)
        } else {
            self.create(user, DEFAULT_CODE_LENGTH)
        }
    }

    /// Removes a user from their lobby
    ///
    /// If the user was the host, the first remaining member reported by the
    /// member set becomes host. The choice is arbitrary but deterministic for
    /// a given backend. When nobody remains the host is cleared and, under
    /// [`VacancyPolicy::End`], the lobby is marked as ended.
    ///
    /// # Errors
    ///
    /// Returns `Error::UserNotInLobby` if the user's pointer is cleared.
    pub fn leave(&self, user: UserId) -> Result<()> {
        let lobby = self.of_user(user)?;
        let host = lobby.host()?;
        if !lobby.is_member(user)? {
            warn!(lobby = %lobby.id, %user, "lobby pointer set without membership");
        }

        let mut batch = Batch::new();
        batch
            .hset(user.key(), "lobby", NONE)
            .srem(lobby.members_key(), user);
        self.store.execute(&batch)?;
        info!(lobby = %lobby.id, %user, "member left");

        if host != Some(user) {
            return Ok(());
        }

        let key = lobby.id.key();
        let mut batch = Batch::new();
        match lobby.members()?.first() {
            Some(successor) => {
                batch.hset(key.as_str(), "host_id", successor);
                info!(lobby = %lobby.id, host = %successor, "host reassigned");
            }
            None => {
                batch.hset(key.as_str(), "host_id", NONE);
                if self.vacancy == VacancyPolicy::End {
                    batch.hset(key.as_str(), "status", LobbyStatus::Ended);
                }
                info!(lobby = %lobby.id, policy = ?self.vacancy, "lobby vacated");
            }
        }
        self.store.execute(&batch)
    }

    /// Removes the member named `username` on behalf of the host
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - the username is not registered
    /// * `Error::UserNotInLobby` - the target is not in a lobby
    /// * `Error::NotHost` - `requester` does not host the target's lobby
    pub fn kick(&self, requester: UserId, username: &str) -> Result<()> {
        let target = self.users.get_by_username(username)?;
        let lobby = self.of_user(target.id())?;
        if lobby.host()? != Some(requester) {
            return Err(Error::NotHost);
        }
        self.leave(target.id())
    }
}
