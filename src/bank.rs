// src/bank.rs

//! The question bank: an immutable, ordered catalog loaded once at startup.
//!
//! A malformed catalog is fatal: the process must refuse to start rather
//! than silently serve an incomplete test.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::models::question::{Question, QuestionKind, Section};

/// Bundled default catalog. A deployment can override it by pointing
/// `QUESTION_BANK_PATH` at its own JSON file of the same shape.
const DEFAULT_BANK_JSON: &str = include_str!("../data/questions.json");

#[derive(Debug)]
pub enum BankError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Empty,
    DuplicateId(String),
    SectionPrefixMismatch(String),
    BlankAnswer(String),
    AnswerNotInChoices(String),
}

impl fmt::Display for BankError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BankError::Io(e) => write!(f, "failed to read question bank: {e}"),
            BankError::Parse(e) => write!(f, "failed to parse question bank: {e}"),
            BankError::Empty => write!(f, "question bank contains no questions"),
            BankError::DuplicateId(id) => write!(f, "duplicate question id '{id}'"),
            BankError::SectionPrefixMismatch(id) => {
                write!(f, "question id '{id}' does not match its section prefix")
            }
            BankError::BlankAnswer(id) => {
                write!(f, "question '{id}' has a blank correct answer")
            }
            BankError::AnswerNotInChoices(id) => {
                write!(f, "question '{id}' has a correct answer not among its choices")
            }
        }
    }
}

impl std::error::Error for BankError {}

/// On-disk question shape. An empty or missing choice list marks a
/// free-response (numeric-entry) question; anything else is multiple-choice.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    id: String,
    section: Section,
    #[serde(default = "default_module")]
    module: u32,
    topic: String,
    difficulty: String,
    prompt: String,
    #[serde(default)]
    passage: Option<String>,
    #[serde(default)]
    choices: Vec<String>,
    answer: String,
}

fn default_module() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct BankFile {
    questions: Vec<RawQuestion>,
}

/// Immutable, ordered question catalog with an id index.
#[derive(Debug)]
pub struct QuestionBank {
    ordered: Vec<Question>,
    by_id: HashMap<String, usize>,
}

impl QuestionBank {
    /// Load the catalog from `path`, or the bundled default when `None`.
    pub fn load(path: Option<&str>) -> Result<Self, BankError> {
        let raw = match path {
            Some(p) => std::fs::read_to_string(p).map_err(BankError::Io)?,
            None => DEFAULT_BANK_JSON.to_string(),
        };
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, BankError> {
        let file: BankFile = serde_json::from_str(raw).map_err(BankError::Parse)?;
        if file.questions.is_empty() {
            return Err(BankError::Empty);
        }

        let mut ordered = Vec::with_capacity(file.questions.len());
        let mut by_id = HashMap::with_capacity(file.questions.len());

        for raw_q in file.questions {
            if !raw_q.id.starts_with(raw_q.section.id_prefix()) {
                return Err(BankError::SectionPrefixMismatch(raw_q.id));
            }
            if raw_q.answer.trim().is_empty() {
                return Err(BankError::BlankAnswer(raw_q.id));
            }

            let kind = if raw_q.choices.is_empty() {
                QuestionKind::FreeResponse
            } else {
                if !raw_q.choices.iter().any(|c| c == &raw_q.answer) {
                    return Err(BankError::AnswerNotInChoices(raw_q.id));
                }
                QuestionKind::MultipleChoice {
                    choices: raw_q.choices,
                }
            };

            let question = Question {
                id: raw_q.id,
                section: raw_q.section,
                module: raw_q.module,
                topic: raw_q.topic,
                difficulty: raw_q.difficulty,
                prompt: raw_q.prompt,
                passage: raw_q.passage,
                kind,
                answer: raw_q.answer,
            };

            if by_id.insert(question.id.clone(), ordered.len()).is_some() {
                return Err(BankError::DuplicateId(question.id));
            }
            ordered.push(question);
        }

        Ok(Self { ordered, by_id })
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// The fixed test form: every question id, in presentation order.
    pub fn ordered_ids(&self) -> Vec<String> {
        self.ordered.iter().map(|q| q.id.clone()).collect()
    }

    pub fn questions(&self) -> &[Question] {
        &self.ordered
    }

    pub fn get(&self, id: &str) -> Option<&Question> {
        self.by_id.get(id).map(|&idx| &self.ordered[idx])
    }

    pub fn section_total(&self, section: Section) -> usize {
        self.ordered.iter().filter(|q| q.section == section).count()
    }
}
