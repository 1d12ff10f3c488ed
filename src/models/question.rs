// src/models/question.rs

use serde::{Deserialize, Serialize};

/// The two scoring partitions of the test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Math,
    ReadingWriting,
}

impl Section {
    /// Question ids carry a section prefix ("m1", "rw7"); the bank loader
    /// rejects catalogs where prefix and section tag disagree.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Section::Math => "m",
            Section::ReadingWriting => "rw",
        }
    }

    /// Position of the section within the test form (shown in the header).
    pub fn number(self) -> u32 {
        match self {
            Section::Math => 1,
            Section::ReadingWriting => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Section::Math => "Math",
            Section::ReadingWriting => "Reading & Writing",
        }
    }
}

/// How a question is answered.
///
/// Multiple-choice answers are compared verbatim against the stored option
/// string; free-response entries tolerate surrounding whitespace and case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice { choices: Vec<String> },
    FreeResponse,
}

/// One entry of the question catalog. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub section: Section,
    pub module: u32,
    pub topic: String,
    pub difficulty: String,
    pub prompt: String,
    pub passage: Option<String>,
    pub kind: QuestionKind,
    /// The correct answer value. Never sent to clients; see `PublicQuestion`.
    pub answer: String,
}

impl Question {
    pub fn choices(&self) -> Option<&[String]> {
        match &self.kind {
            QuestionKind::MultipleChoice { choices } => Some(choices),
            QuestionKind::FreeResponse => None,
        }
    }

    pub fn to_public(&self) -> PublicQuestion {
        PublicQuestion {
            id: self.id.clone(),
            section: self.section,
            module: self.module,
            topic: self.topic.clone(),
            difficulty: self.difficulty.clone(),
            prompt: self.prompt.clone(),
            passage: self.passage.clone(),
            kind: self.kind.clone(),
        }
    }
}

/// DTO for sending a question to the client (excludes the correct answer).
#[derive(Debug, Clone, Serialize)]
pub struct PublicQuestion {
    pub id: String,
    pub section: Section,
    pub module: u32,
    pub topic: String,
    pub difficulty: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passage: Option<String>,
    #[serde(flatten)]
    pub kind: QuestionKind,
}
