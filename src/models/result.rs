// src/models/result.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::error::AppError;
use crate::scoring::QuestionOutcome;

/// Raw 'results' row. Outcomes, weaknesses and recommendations are stored
/// as JSON columns; rows are append-only and never mutated.
#[derive(Debug, FromRow)]
pub struct ResultRow {
    pub id: i64,
    pub user_id: i64,
    pub total_score: i64,
    pub math_score: i64,
    pub rw_score: i64,
    pub correct_count: i64,
    pub total_answered: i64,
    pub elapsed_secs: i64,
    pub outcomes: String,
    pub weaknesses: String,
    pub recommendations: String,
    pub created_at: DateTime<Utc>,
}

/// Dashboard list item (summary fields only).
#[derive(Debug, Serialize)]
pub struct ResultSummary {
    pub id: i64,
    pub total_score: i64,
    pub math_score: i64,
    pub rw_score: i64,
    pub correct_count: i64,
    pub total_answered: i64,
    pub elapsed_secs: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&ResultRow> for ResultSummary {
    fn from(row: &ResultRow) -> Self {
        Self {
            id: row.id,
            total_score: row.total_score,
            math_score: row.math_score,
            rw_score: row.rw_score,
            correct_count: row.correct_count,
            total_answered: row.total_answered,
            elapsed_secs: row.elapsed_secs,
            created_at: row.created_at,
        }
    }
}

/// Full scored result as returned by the detail endpoint and consumed by
/// the report exporter.
#[derive(Debug, Serialize)]
pub struct ResultDetail {
    pub id: i64,
    pub total_score: i64,
    pub math_score: i64,
    pub rw_score: i64,
    pub correct_count: i64,
    pub total_answered: i64,
    pub elapsed_secs: i64,
    pub outcomes: Vec<QuestionOutcome>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ResultRow {
    pub fn into_detail(self) -> Result<ResultDetail, AppError> {
        let outcomes: Vec<QuestionOutcome> = serde_json::from_str(&self.outcomes)
            .map_err(|e| AppError::InternalServerError(format!("corrupt result row: {e}")))?;
        let weaknesses: Vec<String> = serde_json::from_str(&self.weaknesses)
            .map_err(|e| AppError::InternalServerError(format!("corrupt result row: {e}")))?;
        let recommendations: Vec<String> = serde_json::from_str(&self.recommendations)
            .map_err(|e| AppError::InternalServerError(format!("corrupt result row: {e}")))?;

        Ok(ResultDetail {
            id: self.id,
            total_score: self.total_score,
            math_score: self.math_score,
            rw_score: self.rw_score,
            correct_count: self.correct_count,
            total_answered: self.total_answered,
            elapsed_secs: self.elapsed_secs,
            outcomes,
            weaknesses,
            recommendations,
            created_at: self.created_at,
        })
    }
}
