//! Question bank
//!
//! Questions are stored as `question:<id>` hash maps with the choices encoded
//! as a JSON array. The `question:by-statement` index rejects duplicate
//! statements, and every new id is prepended to the global `questions` list,
//! which doubles as the catalog the quiz draws from.

use garde::Validate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    Error, Result,
    constants::{keys::QUESTIONS, question},
    keys::{Entity, QuestionId, UserId},
    store::{Batch, Store},
};

/// Checks that the answer is one of the choices
fn among(choices: &[String]) -> impl FnOnce(&String, &()) -> garde::Result + '_ {
    move |answer, ()| {
        if choices.contains(answer) {
            Ok(())
        } else {
            Err(garde::Error::new("answer is not one of the choices"))
        }
    }
}

/// A complete question as it is seeded and displayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct QuestionRecord {
    /// The question text; unique across the bank
    #[garde(length(chars, min = 1, max = question::MAX_STATEMENT_LENGTH))]
    pub statement: String,
    /// The correct choice
    #[garde(custom(among(&self.choices)))]
    pub answer: String,
    /// The choices in display order
    #[garde(
        length(min = question::MIN_CHOICE_COUNT, max = question::MAX_CHOICE_COUNT),
        inner(length(chars, min = 1))
    )]
    pub choices: Vec<String>,
}

impl QuestionRecord {
    /// Builds a record from borrowed parts
    pub fn new(statement: &str, answer: &str, choices: &[&str]) -> Self {
        Self {
            statement: statement.to_owned(),
            answer: answer.to_owned(),
            choices: choices.iter().map(|c| (*c).to_owned()).collect(),
        }
    }
}

/// Outcome of seeding the bank from a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Questions added to the bank
    pub created: usize,
    /// Questions skipped because their statement already existed
    pub duplicates: usize,
}

/// Handle to a question record
#[derive(Debug, Clone)]
pub struct Question {
    id: QuestionId,
    store: Store,
}

impl Question {
    /// The question's id
    pub fn id(&self) -> QuestionId {
        self.id
    }

    /// The question text
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the question does not exist.
    pub fn statement(&self) -> Result<String> {
        self.store.require(&self.id.key(), "statement")
    }

    /// The correct choice
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the question does not exist.
    pub fn answer(&self) -> Result<String> {
        self.store.require(&self.id.key(), "answer")
    }

    /// The choices in display order
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the question does not exist and
    /// `Error::Decode` if the stored encoding is corrupt.
    pub fn choices(&self) -> Result<Vec<String>> {
        let raw = self.store.require(&self.id.key(), "choices")?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Decode(format!("{} choices: {e}", self.id.key())))
    }

    /// Reads the whole record
    ///
    /// # Errors
    ///
    /// Returns the first error of [`Question::statement`],
    /// [`Question::choices`] or [`Question::answer`].
    pub fn load(&self) -> Result<QuestionRecord> {
        Ok(QuestionRecord {
            statement: self.statement()?,
            choices: self.choices()?,
            answer: self.answer()?,
        })
    }
}

/// Catalog of quiz questions
#[derive(Debug, Clone)]
pub struct QuestionBank {
    store: Store,
}

impl QuestionBank {
    /// Creates a bank over the shared store
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Adds a question
    ///
    /// # Errors
    ///
    /// * `Error::InvalidQuestion` - the record failed validation
    /// * `Error::DuplicateQuestion` - the statement already exists
    pub fn create(&self, statement: &str, answer: &str, choices: &[&str]) -> Result<Question> {
        self.insert(&QuestionRecord::new(statement, answer, choices))
    }

    /// Adds a question from a record
    ///
    /// # Errors
    ///
    /// * `Error::InvalidQuestion` - the record failed validation
    /// * `Error::DuplicateQuestion` - the statement already exists
    pub fn insert(&self, record: &QuestionRecord) -> Result<Question> {
        record
            .validate()
            .map_err(|e| Error::InvalidQuestion(e.to_string()))?;

        let index = Entity::Question.index("statement");
        if self.store.exists(&index, &record.statement)? {
            return Err(Error::DuplicateQuestion);
        }

        let id: QuestionId = self.store.next_id()?;
        let choices = serde_json::to_string(&record.choices)
            .map_err(|e| Error::Decode(format!("choices: {e}")))?;

        let key = id.key();
        let mut batch = Batch::new();
        batch
            .hset(key.as_str(), "id", id)
            .hset(key.as_str(), "statement", &record.statement)
            .hset(key.as_str(), "answer", &record.answer)
            .hset(key.as_str(), "choices", choices)
            .hset(index, &record.statement, id)
            .lpush(QUESTIONS, id);
        self.store.execute(&batch)?;

        info!(%id, "question created");
        Ok(self.get(id))
    }

    /// Loads questions from a JSON array of records
    ///
    /// Records whose statement already exists are skipped and counted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` for a malformed document and stops at the
    /// first invalid record or backend failure.
    pub fn seed_json(&self, json: &str) -> Result<SeedReport> {
        let records: Vec<QuestionRecord> =
            serde_json::from_str(json).map_err(|e| Error::Decode(format!("questions: {e}")))?;

        let mut report = SeedReport::default();
        for record in &records {
            match self.insert(record) {
                Ok(_) => report.created += 1,
                Err(Error::DuplicateQuestion) => {
                    debug!(statement = %record.statement, "skipping duplicate question");
                    report.duplicates += 1;
                }
                Err(e) => return Err(e),
            }
        }
        info!(created = report.created, duplicates = report.duplicates, "questions seeded");
        Ok(report)
    }

    /// A handle to the question with `id`, whether or not it exists
    pub fn get(&self, id: QuestionId) -> Question {
        Question {
            id,
            store: self.store.clone(),
        }
    }

    /// Every id in the global question list, newest first
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the list holds something other than ids.
    pub fn catalog(&self) -> Result<Vec<QuestionId>> {
        self.store.list(QUESTIONS, 0, -1)
    }

    /// Ids already served to `user`, newest first
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the list holds something other than ids.
    pub fn served(&self, user: UserId) -> Result<Vec<QuestionId>> {
        self.store.list(&served_key(user), 0, -1)
    }

    /// Handles for every entry of the global question list
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the list holds something other than ids.
    pub fn list_all(&self) -> Result<Vec<Question>> {
        Ok(self.catalog()?.into_iter().map(|id| self.get(id)).collect())
    }

    /// Handles for every question served to `user`
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the list holds something other than ids.
    pub fn list_for_user(&self, user: UserId) -> Result<Vec<Question>> {
        Ok(self.served(user)?.into_iter().map(|id| self.get(id)).collect())
    }
}

/// Key of the list of questions served to `user`
pub(crate) fn served_key(user: UserId) -> String {
    user.relation("questions")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn bank() -> QuestionBank {
        QuestionBank::new(Store::open(MemoryStore::new()))
    }

    #[test]
    fn test_create_and_read() {
        let bank = bank();
        let q = bank.create("2+2?", "4", &["3", "4", "5"]).unwrap();

        assert_eq!(q.id().get(), 1);
        assert_eq!(q.statement().unwrap(), "2+2?");
        assert_eq!(q.answer().unwrap(), "4");
        assert_eq!(q.choices().unwrap(), ["3", "4", "5"]);
        assert_eq!(
            q.load().unwrap(),
            QuestionRecord::new("2+2?", "4", &["3", "4", "5"])
        );
    }

    #[test]
    fn test_create_duplicate_statement() {
        let bank = bank();
        bank.create("2+2?", "4", &["3", "4"]).unwrap();
        assert!(matches!(
            bank.create("2+2?", "5", &["4", "5"]),
            Err(Error::DuplicateQuestion)
        ));
        assert_eq!(bank.catalog().unwrap().len(), 1);
    }

    #[test]
    fn test_create_invalid() {
        let bank = bank();
        assert!(matches!(
            bank.create("", "4", &["3", "4"]),
            Err(Error::InvalidQuestion(_))
        ));
        assert!(matches!(
            bank.create("2+2?", "4", &["4"]),
            Err(Error::InvalidQuestion(_))
        ));
        assert!(matches!(
            bank.create("2+2?", "6", &["3", "4"]),
            Err(Error::InvalidQuestion(_))
        ));
        assert!(matches!(
            bank.create("2+2?", "4", &["", "4"]),
            Err(Error::InvalidQuestion(_))
        ));
        assert!(bank.catalog().unwrap().is_empty());
    }

    #[test]
    fn test_catalog_is_newest_first() {
        let bank = bank();
        let a = bank.create("a?", "1", &["1", "2"]).unwrap().id();
        let b = bank.create("b?", "1", &["1", "2"]).unwrap().id();
        let c = bank.create("c?", "1", &["1", "2"]).unwrap().id();

        assert_eq!(bank.catalog().unwrap(), [c, b, a]);
        let all = bank.list_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].statement().unwrap(), "c?");
    }

    #[test]
    fn test_lists_empty_when_missing() {
        let bank = bank();
        assert!(bank.list_all().unwrap().is_empty());
        assert!(bank.list_for_user(UserId::new(1)).unwrap().is_empty());
    }

    #[test]
    fn test_missing_question() {
        let bank = bank();
        let ghost = bank.get(QuestionId::new(9));
        assert!(matches!(ghost.statement(), Err(Error::NotFound(_))));
        assert!(matches!(ghost.load(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_corrupt_choices() {
        let store = Store::open(MemoryStore::new());
        let bank = QuestionBank::new(store.clone());
        let q = bank.create("2+2?", "4", &["3", "4"]).unwrap();

        let mut batch = Batch::new();
        batch.hset(q.id().key(), "choices", "[not json");
        store.execute(&batch).unwrap();

        assert!(matches!(q.choices(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_seed_json() {
        let bank = bank();
        bank.create("2+2?", "4", &["3", "4", "5"]).unwrap();

        let json = r#"[
            {"statement": "2+2?", "answer": "4", "choices": ["3", "4", "5"]},
            {"statement": "Capital of France?", "answer": "Paris", "choices": ["Paris", "Rome"]},
            {"statement": "3*3?", "answer": "9", "choices": ["6", "9"]}
        ]"#;
        let report = bank.seed_json(json).unwrap();
        assert_eq!(
            report,
            SeedReport {
                created: 2,
                duplicates: 1
            }
        );
        assert_eq!(bank.catalog().unwrap().len(), 3);
    }

    #[test]
    fn test_seed_json_malformed() {
        let bank = bank();
        assert!(matches!(bank.seed_json("{"), Err(Error::Decode(_))));
        assert!(matches!(
            bank.seed_json(r#"[{"statement": "x", "answer": "y", "choices": ["a", "b"]}]"#),
            Err(Error::InvalidQuestion(_))
        ));
    }
}
