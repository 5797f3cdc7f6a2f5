//! Entity identity and key naming
//!
//! Every persisted key is hierarchical and human-readable:
//!
//! * `<entity>:<id>` holds the record of one entity as a hash map
//! * `<entity>:by-<field>` is a secondary index mapping a field value to an id
//! * `<entity>:<id>:<relation>` holds a collection owned by the entity
//! * `<entity>:next-id` is the counter ids are allocated from
//!
//! Ids are typed by the entity they refer to, so a lobby id cannot be passed
//! where a user id is expected.

use std::{fmt::Display, marker::PhantomData, num::ParseIntError, str::FromStr};

use derive_where::derive_where;
use heck::ToKebabCase;
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::keys::NEXT_ID;

/// The kinds of entity stored in the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    /// A registered user
    User,
    /// A group session identified by a join code
    Lobby,
    /// A quiz question
    Question,
    /// A user's quiz progression record
    UserQuestion,
    /// A status update posted by a user
    Update,
}

impl Entity {
    /// Key prefix of this entity, e.g. `user-question`
    pub fn name(self) -> String {
        format!("{self:?}").to_kebab_case()
    }

    /// Key of the counter ids are allocated from
    pub fn counter(self) -> String {
        format!("{}:{NEXT_ID}", self.name())
    }

    /// Key of the secondary index over `field`
    pub fn index(self, field: &str) -> String {
        format!("{}:by-{field}", self.name())
    }
}

/// Marker trait tying an id type to the entity it identifies
pub trait Kind {
    /// The entity this kind names
    const ENTITY: Entity;
}

/// Marker for user ids
#[derive(Debug)]
pub enum UserKind {}
/// Marker for lobby ids
#[derive(Debug)]
pub enum LobbyKind {}
/// Marker for question ids
#[derive(Debug)]
pub enum QuestionKind {}
/// Marker for progression record ids
#[derive(Debug)]
pub enum UserQuestionKind {}
/// Marker for status update ids
#[derive(Debug)]
pub enum UpdateKind {}

impl Kind for UserKind {
    const ENTITY: Entity = Entity::User;
}
impl Kind for LobbyKind {
    const ENTITY: Entity = Entity::Lobby;
}
impl Kind for QuestionKind {
    const ENTITY: Entity = Entity::Question;
}
impl Kind for UserQuestionKind {
    const ENTITY: Entity = Entity::UserQuestion;
}
impl Kind for UpdateKind {
    const ENTITY: Entity = Entity::Update;
}

/// Identifier of a user
pub type UserId = Id<UserKind>;
/// Identifier of a lobby
pub type LobbyId = Id<LobbyKind>;
/// Identifier of a question
pub type QuestionId = Id<QuestionKind>;
/// Identifier of a progression record
pub type UserQuestionId = Id<UserQuestionKind>;
/// Identifier of a status update
pub type UpdateId = Id<UpdateKind>;

/// A monotonically allocated 64-bit entity id
#[derive_where(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id<K> {
    raw: i64,
    kind: PhantomData<fn() -> K>,
}

impl<K> Id<K> {
    /// Wraps a raw id
    pub const fn new(raw: i64) -> Self {
        Self {
            raw,
            kind: PhantomData,
        }
    }

    /// The raw numeric value
    pub const fn get(self) -> i64 {
        self.raw
    }
}

impl<K: Kind> Id<K> {
    /// Key of the hash map holding this entity's record
    pub fn key(self) -> String {
        format!("{}:{}", K::ENTITY.name(), self.raw)
    }

    /// Key of a collection owned by this entity
    pub fn relation(self, relation: &str) -> String {
        format!("{}:{relation}", self.key())
    }
}

impl<K> Display for Id<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.raw.fmt(f)
    }
}

impl<K> FromStr for Id<K> {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.parse()?))
    }
}

impl<K> Serialize for Id<K> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.raw)
    }
}

impl<'de, K> Deserialize<'de> for Id<K> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        i64::deserialize(deserializer).map(Self::new)
    }
}
