// src/handlers/session.rs

//! The test-session state machine: one live attempt per user, navigated
//! under a wall-clock deadline, finalized into an immutable scored result.
//!
//! Expiry is checked lazily against `started_at + duration` on each
//! request; no server-side timers run. An expired attempt still accepts
//! answers and finalization; the deadline only caps the elapsed time and
//! the remaining-time display.

use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    bank::QuestionBank,
    config::Config,
    error::AppError,
    models::{
        attempt::{
            Attempt, AttemptRow, CurrentQuestionResponse, ReviewFlagRequest, StartTestRequest,
            SubmitAnswerRequest, SubmitAnswerResponse, TestStatusResponse,
        },
        question::Question,
    },
    scoring,
    utils::jwt::{Claims, user_id_from},
};

const SELECT_ATTEMPT: &str = r#"
    SELECT user_id, question_ids, answers, review_flags, cursor, started_at, duration_secs
    FROM attempts
    WHERE user_id = ?
"#;

async fn load_attempt(pool: &SqlitePool, user_id: i64) -> Result<Option<Attempt>, AppError> {
    let row = sqlx::query_as::<_, AttemptRow>(SELECT_ATTEMPT)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    row.map(Attempt::try_from).transpose()
}

/// Write back the mutable attempt fields in one statement.
///
/// The `cursor = expected` guard is a compare-and-set: if another request
/// for the same user won the race, zero rows match and the caller is told
/// to re-fetch rather than silently losing its update.
async fn persist_attempt(
    pool: &SqlitePool,
    attempt: &Attempt,
    expected_cursor: usize,
) -> Result<(), AppError> {
    let updated = sqlx::query(
        r#"
        UPDATE attempts
        SET answers = ?, review_flags = ?, cursor = ?
        WHERE user_id = ? AND cursor = ?
        "#,
    )
    .bind(encode_json(&attempt.answers)?)
    .bind(encode_json(&attempt.review_flags)?)
    .bind(attempt.cursor as i64)
    .bind(attempt.user_id)
    .bind(expected_cursor as i64)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::QuestionMismatch(
            "The test session changed while this request was in flight. Re-fetch the current question.".to_string(),
        ));
    }
    Ok(())
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string(value).map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Starts a fresh attempt for the authenticated user.
///
/// The single-live-attempt invariant is the primary key on
/// `attempts.user_id`; a second start maps the unique violation to
/// `AlreadyActive` instead of pre-checking (no read-then-insert race).
pub async fn start_test(
    State(pool): State<SqlitePool>,
    State(config): State<Config>,
    State(bank): State<Arc<QuestionBank>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartTestRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = req.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user_id = user_id_from(&claims)?;
    let duration_secs = req.duration_secs.unwrap_or(config.test_duration_secs);
    let attempt = Attempt::new(user_id, bank.ordered_ids(), Utc::now(), duration_secs);

    sqlx::query(
        r#"
        INSERT INTO attempts
            (user_id, question_ids, answers, review_flags, cursor, started_at, duration_secs)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(encode_json(&attempt.question_ids)?)
    .bind(encode_json(&attempt.answers)?)
    .bind(encode_json(&attempt.review_flags)?)
    .bind(attempt.cursor as i64)
    .bind(attempt.started_at)
    .bind(attempt.duration_secs)
    .execute(&pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            AppError::AlreadyActive
        } else {
            tracing::error!("Failed to create attempt: {:?}", e);
            AppError::from(e)
        }
    })?;

    tracing::info!(
        user_id,
        total_questions = attempt.len(),
        duration_secs,
        "Test attempt started"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "total_questions": attempt.len(),
            "duration_secs": duration_secs,
            "started_at": attempt.started_at,
        })),
    ))
}

/// Returns the question at the cursor together with the user's stored
/// answer, review flag and remaining time.
pub async fn current_question(
    State(pool): State<SqlitePool>,
    State(bank): State<Arc<QuestionBank>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from(&claims)?;
    let attempt = load_attempt(&pool, user_id)
        .await?
        .ok_or(AppError::NoActiveAttempt)?;

    let question_id = attempt.current_question_id().ok_or_else(|| {
        AppError::InternalServerError("attempt cursor out of range".to_string())
    })?;
    let question = lookup(&bank, question_id)?;

    let now = Utc::now();
    Ok(Json(CurrentQuestionResponse {
        position: attempt.cursor + 1,
        total_questions: attempt.len(),
        section_label: format!(
            "Section {}, Module {}: {}",
            question.section.number(),
            question.module,
            question.section.label()
        ),
        selected_answer: attempt.answer_for(question_id).map(str::to_string),
        marked_for_review: attempt.is_marked(question_id),
        time_remaining_secs: attempt.remaining_secs(now),
        expired: attempt.is_expired(now),
        question: question.to_public(),
    }))
}

/// Stores an answer and review flag for the cursor question, then moves
/// the cursor (clamped at both ends of the form).
///
/// Submissions are accepted after the deadline too; expiry only matters
/// for the elapsed-time cap at finalization.
pub async fn submit_answer(
    State(pool): State<SqlitePool>,
    State(bank): State<Arc<QuestionBank>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from(&claims)?;
    let mut attempt = load_attempt(&pool, user_id)
        .await?
        .ok_or(AppError::NoActiveAttempt)?;

    // A multiple-choice value must be one of the offered choices.
    if let Some(answer) = req.answer.as_deref() {
        let question = lookup(&bank, &req.question_id)?;
        if let Some(choices) = question.choices() {
            if !choices.iter().any(|c| c == answer) {
                return Err(AppError::BadRequest(format!(
                    "'{answer}' is not one of the offered choices for question '{}'",
                    req.question_id
                )));
            }
        }
    }

    let expected_cursor = attempt.cursor;
    attempt.record_answer(&req.question_id, req.answer, req.mark_review, req.action)?;
    persist_attempt(&pool, &attempt, expected_cursor).await?;

    let now = Utc::now();
    Ok(Json(SubmitAnswerResponse {
        cursor: attempt.cursor,
        at_last_question: attempt.cursor + 1 == attempt.len(),
        time_remaining_secs: attempt.remaining_secs(now),
        expired: attempt.is_expired(now),
    }))
}

/// Toggles a review flag without touching the cursor (used by the
/// asynchronous "mark for review" control).
pub async fn update_review_flag(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReviewFlagRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from(&claims)?;
    let mut attempt = load_attempt(&pool, user_id)
        .await?
        .ok_or(AppError::NoActiveAttempt)?;

    let expected_cursor = attempt.cursor;
    attempt.set_review_flag(&req.question_id, req.flag)?;
    persist_attempt(&pool, &attempt, expected_cursor).await?;

    Ok(Json(json!({
        "question_id": req.question_id,
        "flag": req.flag,
    })))
}

/// Reports deadline and progress for the live attempt.
pub async fn test_status(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from(&claims)?;
    let attempt = load_attempt(&pool, user_id)
        .await?
        .ok_or(AppError::NoActiveAttempt)?;

    let now = Utc::now();
    Ok(Json(TestStatusResponse {
        cursor: attempt.cursor,
        total_questions: attempt.len(),
        answered: attempt.answered_count(),
        time_remaining_secs: attempt.remaining_secs(now),
        expired: attempt.is_expired(now),
    }))
}

/// Finalizes the attempt: scores the captured answers, persists the
/// result, and clears the attempt, all in one transaction.
///
/// The rows-affected check on the delete makes concurrent finalize calls
/// produce exactly one result; the loser rolls back and reports
/// `NoActiveAttempt`. Unanswered questions score as incorrect, and elapsed
/// time is capped at the deadline.
pub async fn finalize_test(
    State(pool): State<SqlitePool>,
    State(bank): State<Arc<QuestionBank>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from(&claims)?;
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, AttemptRow>(SELECT_ATTEMPT)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
    let attempt = Attempt::try_from(row.ok_or(AppError::NoActiveAttempt)?)?;

    // The attempt's form and the loaded catalog come from the same bank,
    // so a miss here means the deployment swapped catalogs mid-attempt.
    let questions: Vec<Question> = attempt
        .question_ids
        .iter()
        .map(|id| {
            bank.get(id).cloned().ok_or_else(|| {
                AppError::InternalServerError(format!("question '{id}' missing from the catalog"))
            })
        })
        .collect::<Result<_, _>>()?;

    let breakdown = scoring::score(&questions, &attempt.answers);
    let elapsed_secs = attempt.elapsed_secs(now);

    let deleted = sqlx::query("DELETE FROM attempts WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::NoActiveAttempt);
    }

    let result_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO results
            (user_id, total_score, math_score, rw_score, correct_count, total_answered,
             elapsed_secs, outcomes, weaknesses, recommendations, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(breakdown.total_score)
    .bind(breakdown.math_score)
    .bind(breakdown.rw_score)
    .bind(breakdown.correct_count as i64)
    .bind(breakdown.total_answered as i64)
    .bind(elapsed_secs)
    .bind(encode_json(&breakdown.outcomes)?)
    .bind(encode_json(&breakdown.weaknesses)?)
    .bind(encode_json(&breakdown.recommendations)?)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        user_id,
        result_id,
        total_score = breakdown.total_score,
        elapsed_secs,
        "Attempt finalized"
    );

    Ok(Json(json!({
        "result_id": result_id,
        "total_score": breakdown.total_score,
        "math_score": breakdown.math_score,
        "rw_score": breakdown.rw_score,
        "correct_count": breakdown.correct_count,
        "total_answered": breakdown.total_answered,
        "elapsed_secs": elapsed_secs,
        "weaknesses": breakdown.weaknesses,
        "recommendations": breakdown.recommendations,
    })))
}

/// Discards any live attempt. Always succeeds; finalized results are
/// unaffected.
pub async fn reset_test(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from(&claims)?;

    let deleted = sqlx::query("DELETE FROM attempts WHERE user_id = ?")
        .bind(user_id)
        .execute(&pool)
        .await?;

    tracing::info!(user_id, discarded = deleted.rows_affected(), "Test session reset");
    Ok(Json(json!({
        "reset": true,
        "discarded_attempt": deleted.rows_affected() > 0,
    })))
}

fn lookup<'a>(bank: &'a QuestionBank, question_id: &str) -> Result<&'a Question, AppError> {
    bank.get(question_id)
        .ok_or_else(|| AppError::UnknownQuestion(question_id.to_string()))
}
