//! The quiz service
//!
//! [`Quiz`] wires every component to one shared [`Store`], one random source
//! and one set of [`Options`], and offers the multi-step flows request
//! handlers need: registration, login and answering.

use std::sync::Arc;

use tracing::info;

use crate::{
    Result,
    code::Entropy,
    config::Options,
    credentials::{Bcrypt, PasswordHasher},
    keys::UserId,
    leaderboard::Leaderboard,
    lobby::{Lobby, LobbyManager},
    progression::{Progression, Verdict},
    questions::QuestionBank,
    store::Store,
    updates::Feed,
    users::{User, UserDirectory},
};

/// Every component of the data layer over one backend
#[derive(Debug, Clone)]
pub struct Quiz {
    store: Store,
    options: Options,
    users: UserDirectory,
    lobbies: LobbyManager,
    questions: QuestionBank,
    progression: Progression,
    leaderboard: Leaderboard,
    feed: Feed,
}

impl Quiz {
    /// Builds the service with an unseeded random source and bcrypt at the
    /// configured cost
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidOptions` if the options fail validation.
    pub fn new(store: Store, options: Options) -> Result<Self> {
        Self::with_entropy(store, options, Entropy::new())
    }

    /// Builds the service with a specific random source
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidOptions` if the options fail validation.
    pub fn with_entropy(store: Store, options: Options, entropy: Entropy) -> Result<Self> {
        let hasher = Arc::new(Bcrypt::new(options.hash_cost));
        Self::with_parts(store, options, entropy, hasher)
    }

    /// Builds the service from every injectable part
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidOptions` if the options fail validation.
    pub fn with_parts(
        store: Store,
        options: Options,
        entropy: Entropy,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Result<Self> {
        let options = options.checked()?;
        let users = UserDirectory::with_hasher(store.clone(), hasher);
        let questions = QuestionBank::new(store.clone());
        let lobbies =
            LobbyManager::with_options(store.clone(), users.clone(), entropy.clone(), &options);
        let progression = Progression::new(
            store.clone(),
            questions.clone(),
            users.clone(),
            entropy,
            &options,
        );
        let leaderboard = Leaderboard::new(store.clone(), users.clone(), &options);
        let feed = Feed::new(store.clone(), users.clone());

        Ok(Self {
            store,
            options,
            users,
            lobbies,
            questions,
            progression,
            leaderboard,
            feed,
        })
    }

    /// The shared store handle
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The validated options
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The user directory
    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// The lobby manager
    pub fn lobbies(&self) -> &LobbyManager {
        &self.lobbies
    }

    /// The question bank
    pub fn questions(&self) -> &QuestionBank {
        &self.questions
    }

    /// The progression engine
    pub fn progression(&self) -> &Progression {
        &self.progression
    }

    /// The leaderboard
    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    /// The status-update feed
    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    /// Registers a user and starts their quiz
    ///
    /// The steps are not atomic: if initializing the progression fails, the
    /// user stays registered and `Progression::initialize` can be retried.
    ///
    /// # Errors
    ///
    /// * `Error::Hashing` - the password could not be hashed
    /// * `Error::InvalidUsername` or `Error::DuplicateUsername` - see
    ///   [`UserDirectory::create`]
    pub fn register(&self, username: &str, password: &str) -> Result<User> {
        let hash = self.users.hasher().hash(password)?;
        let user = self.users.create(username, &hash)?;
        self.progression.initialize(user.id())?;
        info!(user = %user.id(), "user registered");
        Ok(user)
    }

    /// Checks a login attempt
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - the username is not registered
    /// * `Error::InvalidCredentials` - the password does not match
    pub fn login(&self, username: &str, password: &str) -> Result<User> {
        self.users.authenticate(username, password)
    }

    /// Submits a choice and publishes the new total on a correct answer
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`Progression::confirm_answer`] and
    /// [`Leaderboard::update`].
    pub fn answer(&self, user: UserId, choice: &str) -> Result<Verdict> {
        let verdict = self.progression.confirm_answer(user, choice)?;
        if let Verdict::Correct { points, .. } = verdict {
            self.leaderboard.update(user, points)?;
        }
        Ok(verdict)
    }

    /// Opens a lobby hosted by `host` with a code of the configured length
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`LobbyManager::create`].
    pub fn open_lobby(&self, host: UserId) -> Result<Lobby> {
        self.lobbies.create(host, self.options.code_length)
    }

    /// Closes the backend; every handle fails afterwards
    ///
    /// # Errors
    ///
    /// Propagates the backend's shutdown failure.
    pub fn close(self) -> Result<()> {
        info!("closing quiz service");
        self.store.close()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{
        Error,
        constants::credentials::MIN_COST,
        store::{CancelToken, memory::MemoryStore},
    };

    fn options() -> Options {
        Options {
            hash_cost: MIN_COST,
            ..Options::default()
        }
    }

    fn quiz() -> Quiz {
        Quiz::with_entropy(Store::open(MemoryStore::new()), options(), Entropy::seeded(5)).unwrap()
    }

    #[test]
    fn test_register_and_login() {
        let quiz = quiz();
        let alice = quiz.register("alice", "hunter2").unwrap();

        assert_eq!(quiz.login("alice", "hunter2").unwrap().id(), alice.id());
        assert!(matches!(
            quiz.login("alice", "hunter3"),
            Err(Error::InvalidCredentials)
        ));
        assert_ne!(alice.hash().unwrap(), "hunter2");
        assert_eq!(quiz.progression().points(alice.id()).unwrap(), 0);
    }

    #[test]
    fn test_register_duplicate() {
        let quiz = quiz();
        quiz.register("alice", "pw").unwrap();
        assert!(matches!(
            quiz.register("alice", "pw"),
            Err(Error::DuplicateUsername)
        ));
    }

    #[test]
    fn test_answer_updates_leaderboard() {
        let quiz = quiz();
        quiz.questions()
            .seed_json(
                r#"[
                    {"statement": "2+2?", "answer": "4", "choices": ["3", "4", "5"]},
                    {"statement": "3+3?", "answer": "6", "choices": ["6", "7"]}
                ]"#,
            )
            .unwrap();
        let alice = quiz.register("alice", "pw").unwrap().id();
        let bob = quiz.register("bob", "pw").unwrap().id();

        assert_eq!(quiz.answer(alice, "5").unwrap(), Verdict::Incorrect);
        assert_eq!(quiz.leaderboard().rank(alice).unwrap(), None);

        assert!(matches!(
            quiz.answer(alice, "4").unwrap(),
            Verdict::Correct { points: 1, .. }
        ));
        assert_eq!(quiz.leaderboard().rank(alice).unwrap(), Some(0));

        let top = quiz.leaderboard().leaders().unwrap();
        assert_eq!(top.items().len(), 1);
        assert_eq!(top.items()[0].username, "alice");
        assert_eq!(quiz.leaderboard().rank(bob).unwrap(), None);
    }

    #[test]
    fn test_open_lobby_uses_code_length() {
        let store = Store::open(MemoryStore::new());
        let quiz = Quiz::with_entropy(
            store,
            Options {
                code_length: 8,
                ..options()
            },
            Entropy::seeded(1),
        )
        .unwrap();
        let alice = quiz.register("alice", "pw").unwrap().id();

        let lobby = quiz.open_lobby(alice).unwrap();
        assert_eq!(lobby.code().unwrap().as_str().len(), 8);
        assert_eq!(quiz.lobbies().of_user(alice).unwrap().id(), lobby.id());
    }

    #[test]
    fn test_invalid_options() {
        let result = Quiz::new(
            Store::open(MemoryStore::new()),
            Options {
                top_count: 0,
                ..Options::default()
            },
        );
        assert!(matches!(result, Err(Error::InvalidOptions(_))));
    }

    #[test]
    fn test_cancelled_store() {
        let token = CancelToken::new();
        let store = Store::open(MemoryStore::new()).with_cancel(token.clone());
        let quiz = Quiz::with_entropy(store, options(), Entropy::seeded(2)).unwrap();

        quiz.register("alice", "pw").unwrap();
        token.cancel();
        assert_eq!(
            quiz.users().get_by_username("alice").map(|u| u.id()),
            Err(Error::Cancelled)
        );
    }

    #[test]
    fn test_close() {
        let store = Store::open(MemoryStore::new());
        let quiz = Quiz::with_entropy(store.clone(), options(), Entropy::seeded(3)).unwrap();
        quiz.close().unwrap();
        assert!(matches!(
            store.next_id::<crate::keys::UserKind>(),
            Err(Error::BackendUnavailable(_))
        ));
    }
}
