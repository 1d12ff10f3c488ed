// src/models/attempt.rs

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::error::AppError;
use crate::models::question::PublicQuestion;

/// Which way the cursor moves after an answer submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavDirection {
    Next,
    Back,
}

/// Raw 'attempts' row. The JSON columns are decoded into an `Attempt`.
#[derive(Debug, FromRow)]
pub struct AttemptRow {
    pub user_id: i64,
    pub question_ids: String,
    pub answers: String,
    pub review_flags: String,
    pub cursor: i64,
    pub started_at: DateTime<Utc>,
    pub duration_secs: i64,
}

/// One user's in-progress pass through the fixed question sequence.
///
/// At most one of these exists per user (enforced by the primary key on
/// `attempts.user_id`). All transitions keep the cursor inside
/// `[0, question_ids.len())`.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub user_id: i64,
    pub question_ids: Vec<String>,
    pub answers: HashMap<String, String>,
    pub review_flags: HashMap<String, bool>,
    pub cursor: usize,
    pub started_at: DateTime<Utc>,
    pub duration_secs: i64,
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = AppError;

    fn try_from(row: AttemptRow) -> Result<Self, AppError> {
        let question_ids: Vec<String> = serde_json::from_str(&row.question_ids)
            .map_err(|e| AppError::InternalServerError(format!("corrupt attempt row: {e}")))?;
        let answers: HashMap<String, String> = serde_json::from_str(&row.answers)
            .map_err(|e| AppError::InternalServerError(format!("corrupt attempt row: {e}")))?;
        let review_flags: HashMap<String, bool> = serde_json::from_str(&row.review_flags)
            .map_err(|e| AppError::InternalServerError(format!("corrupt attempt row: {e}")))?;

        Ok(Self {
            user_id: row.user_id,
            question_ids,
            answers,
            review_flags,
            cursor: row.cursor.max(0) as usize,
            started_at: row.started_at,
            duration_secs: row.duration_secs,
        })
    }
}

impl Attempt {
    pub fn new(
        user_id: i64,
        question_ids: Vec<String>,
        started_at: DateTime<Utc>,
        duration_secs: i64,
    ) -> Self {
        Self {
            user_id,
            question_ids,
            answers: HashMap::new(),
            review_flags: HashMap::new(),
            cursor: 0,
            started_at,
            duration_secs,
        }
    }

    pub fn len(&self) -> usize {
        self.question_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.question_ids.is_empty()
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.started_at + Duration::seconds(self.duration_secs)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline()
    }

    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline() - now).num_seconds().max(0)
    }

    /// Elapsed time, capped at the configured duration once the deadline
    /// has passed.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> i64 {
        let end = now.min(self.deadline());
        (end - self.started_at).num_seconds().max(0)
    }

    pub fn current_question_id(&self) -> Option<&str> {
        self.question_ids.get(self.cursor).map(String::as_str)
    }

    pub fn answer_for(&self, question_id: &str) -> Option<&str> {
        self.answers.get(question_id).map(String::as_str)
    }

    pub fn is_marked(&self, question_id: &str) -> bool {
        self.review_flags.get(question_id).copied().unwrap_or(false)
    }

    /// Questions with a non-empty stored answer.
    pub fn answered_count(&self) -> usize {
        self.answers.values().filter(|a| !a.trim().is_empty()).count()
    }

    /// Record an answer and review flag for the cursor question, then move
    /// the cursor.
    ///
    /// The submitted id must match the question at the cursor; a stale or
    /// replayed id is rejected without touching any state. `answer: None`
    /// leaves a previously stored value in place. The cursor clamps at both
    /// ends of the sequence.
    pub fn record_answer(
        &mut self,
        question_id: &str,
        answer: Option<String>,
        review: bool,
        direction: NavDirection,
    ) -> Result<(), AppError> {
        let current = self.current_question_id().ok_or_else(|| {
            AppError::InternalServerError("attempt cursor out of range".to_string())
        })?;
        if current != question_id {
            return Err(AppError::QuestionMismatch(format!(
                "Expected an answer for question '{current}', got '{question_id}'. Re-fetch the current question."
            )));
        }

        if let Some(value) = answer {
            self.answers.insert(question_id.to_string(), value);
        }
        self.review_flags.insert(question_id.to_string(), review);

        self.cursor = match direction {
            NavDirection::Next => (self.cursor + 1).min(self.len().saturating_sub(1)),
            NavDirection::Back => self.cursor.saturating_sub(1),
        };
        Ok(())
    }

    /// Out-of-band review-flag toggle; the cursor stays put.
    pub fn set_review_flag(&mut self, question_id: &str, flag: bool) -> Result<(), AppError> {
        if !self.question_ids.iter().any(|id| id == question_id) {
            return Err(AppError::UnknownQuestion(question_id.to_string()));
        }
        self.review_flags.insert(question_id.to_string(), flag);
        Ok(())
    }
}

/// DTO for starting a test. The duration defaults to the configured value.
#[derive(Debug, Deserialize, Validate)]
pub struct StartTestRequest {
    #[validate(range(min = 1, max = 14400))]
    pub duration_secs: Option<i64>,
}

/// DTO for submitting an answer for the cursor question.
#[derive(Debug, Deserialize)]
pub struct SubmitAnswerRequest {
    pub question_id: String,
    pub answer: Option<String>,
    #[serde(default)]
    pub mark_review: bool,
    pub action: NavDirection,
}

/// DTO for toggling a review flag without moving the cursor.
#[derive(Debug, Deserialize)]
pub struct ReviewFlagRequest {
    pub question_id: String,
    pub flag: bool,
}

/// Response for `GET /api/test/current`.
#[derive(Debug, Serialize)]
pub struct CurrentQuestionResponse {
    pub question: PublicQuestion,
    pub position: usize,
    pub total_questions: usize,
    pub section_label: String,
    pub selected_answer: Option<String>,
    pub marked_for_review: bool,
    pub time_remaining_secs: i64,
    pub expired: bool,
}

/// Response for `POST /api/test/answer`.
#[derive(Debug, Serialize)]
pub struct SubmitAnswerResponse {
    pub cursor: usize,
    pub at_last_question: bool,
    pub time_remaining_secs: i64,
    pub expired: bool,
}

/// Response for `GET /api/test/status`.
#[derive(Debug, Serialize)]
pub struct TestStatusResponse {
    pub cursor: usize,
    pub total_questions: usize,
    pub answered: usize,
    pub time_remaining_secs: i64,
    pub expired: bool,
}
