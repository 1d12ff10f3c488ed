// src/handlers/results.rs

//! Read path for finalized results: dashboard listing, detail view, and
//! the downloadable per-question CSV report.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use sqlx::SqlitePool;

use crate::{
    bank::QuestionBank,
    error::AppError,
    models::result::{ResultDetail, ResultRow, ResultSummary},
    utils::jwt::{Claims, user_id_from},
};

const SELECT_RESULT: &str = r#"
    SELECT id, user_id, total_score, math_score, rw_score, correct_count,
           total_answered, elapsed_secs, outcomes, weaknesses, recommendations, created_at
    FROM results
"#;

/// Lists the current user's results, newest first (the dashboard view).
pub async fn list_results(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from(&claims)?;

    let rows = sqlx::query_as::<_, ResultRow>(&format!(
        "{SELECT_RESULT} WHERE user_id = ? ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    let summaries: Vec<ResultSummary> = rows.iter().map(ResultSummary::from).collect();
    Ok(Json(summaries))
}

async fn fetch_owned_result(
    pool: &SqlitePool,
    result_id: i64,
    user_id: i64,
) -> Result<ResultRow, AppError> {
    let row = sqlx::query_as::<_, ResultRow>(&format!("{SELECT_RESULT} WHERE id = ?"))
        .bind(result_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Result {result_id} not found")))?;

    if row.user_id != user_id {
        tracing::warn!(user_id, result_id, "Denied access to another user's result");
        return Err(AppError::Forbidden(
            "You do not have permission to access this score report".to_string(),
        ));
    }
    Ok(row)
}

/// Full result detail, including per-question outcomes.
pub async fn get_result(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(result_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from(&claims)?;
    let row = fetch_owned_result(&pool, result_id, user_id).await?;
    Ok(Json(row.into_detail()?))
}

/// Streams the detailed per-question report as a CSV attachment.
pub async fn download_report(
    State(pool): State<SqlitePool>,
    State(bank): State<Arc<QuestionBank>>,
    Extension(claims): Extension<Claims>,
    Path(result_id): Path<i64>,
) -> Result<Response, AppError> {
    let user_id = user_id_from(&claims)?;
    let row = fetch_owned_result(&pool, result_id, user_id).await?;
    let detail = row.into_detail()?;
    let report = render_csv_report(&detail, &bank);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=sat_detailed_report_{result_id}.csv"),
            ),
        ],
        report,
    )
        .into_response())
}

const REPORT_HEADERS: [&str; 13] = [
    "Question Number",
    "Section",
    "Skill Type",
    "Your Answer",
    "Correct Answer",
    "Outcome",
    "QuestionID",
    "Module",
    "Difficulty",
    "QuestionText",
    "AllOptions",
    "ScoreID",
    "TestDate",
];

/// One row per form question, joining the stored outcome with bank detail.
fn render_csv_report(detail: &ResultDetail, bank: &QuestionBank) -> String {
    let mut out = String::new();
    out.push_str(&REPORT_HEADERS.join(","));
    out.push('\n');

    let test_date = detail.created_at.format("%Y-%m-%d %H:%M:%S").to_string();

    for (idx, outcome) in detail.outcomes.iter().enumerate() {
        let question = bank.get(&outcome.question_id);

        let (module, difficulty, text, options) = match question {
            Some(q) => {
                let text = match &q.passage {
                    Some(_) => format!("[Passage Based] {}", q.prompt),
                    None => q.prompt.clone(),
                };
                let options = serde_json::to_string(q.choices().unwrap_or_default())
                    .unwrap_or_else(|_| "[]".to_string());
                (q.module.to_string(), q.difficulty.clone(), text, options)
            }
            None => (
                "N/A".to_string(),
                "N/A".to_string(),
                format!("Details not found for question '{}'", outcome.question_id),
                "[]".to_string(),
            ),
        };

        let outcome_label = match &outcome.user_answer {
            None => "Not Answered",
            Some(_) if outcome.correct => "Correct",
            Some(_) => "Incorrect",
        };

        let fields = [
            (idx + 1).to_string(),
            outcome.section.label().to_string(),
            outcome.topic.clone(),
            outcome
                .user_answer
                .clone()
                .unwrap_or_else(|| "Not Answered".to_string()),
            outcome.correct_answer.clone(),
            outcome_label.to_string(),
            outcome.question_id.clone(),
            module,
            difficulty,
            text,
            options,
            detail.id.to_string(),
            test_date.clone(),
        ];

        let row: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }

    out
}

fn csv_field(value: &str) -> String {
    if value.contains(['"', ',', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
