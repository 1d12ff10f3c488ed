// tests/session_tests.rs

//! End-to-end tests for the test-session state machine and the scoring
//! pipeline, driven over the public HTTP API.

use std::sync::Arc;
use std::time::Duration;

use satinsight::bank::QuestionBank;
use satinsight::config::Config;
use satinsight::routes;
use satinsight::state::AppState;
use serde_json::{Value, json};
use sqlx::sqlite::SqlitePoolOptions;

async fn spawn_app() -> String {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        question_bank_path: None,
        test_duration_secs: 1800,
    };

    let bank = QuestionBank::load(None).expect("Failed to load bundled question bank");

    let state = AppState {
        pool,
        config,
        bank: Arc::new(bank),
    };

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://127.0.0.1:{}", port)
}

async fn register_and_login(address: &str, client: &reqwest::Client) -> String {
    let username = format!("u_{}", &uuid::Uuid::new_v4().to_string()[..8]);
    let payload = json!({ "username": username, "password": "password123" });

    client
        .post(format!("{address}/api/auth/register"))
        .json(&payload)
        .send()
        .await
        .expect("Register failed");

    let login: Value = client
        .post(format!("{address}/api/auth/login"))
        .json(&payload)
        .send()
        .await
        .expect("Login failed")
        .json()
        .await
        .expect("Failed to parse login response");

    login["token"].as_str().expect("Token not found").to_string()
}

async fn start_test(address: &str, client: &reqwest::Client, token: &str, body: Value) -> reqwest::Response {
    client
        .post(format!("{address}/api/test/start"))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .expect("Start request failed")
}

async fn current(address: &str, client: &reqwest::Client, token: &str) -> Value {
    client
        .get(format!("{address}/api/test/current"))
        .bearer_auth(token)
        .send()
        .await
        .expect("Current request failed")
        .json()
        .await
        .expect("Failed to parse current question")
}

async fn submit(
    address: &str,
    client: &reqwest::Client,
    token: &str,
    question_id: &str,
    answer: Option<&str>,
    mark_review: bool,
    action: &str,
) -> reqwest::Response {
    client
        .post(format!("{address}/api/test/answer"))
        .bearer_auth(token)
        .json(&json!({
            "question_id": question_id,
            "answer": answer,
            "mark_review": mark_review,
            "action": action,
        }))
        .send()
        .await
        .expect("Answer request failed")
}

async fn finalize(address: &str, client: &reqwest::Client, token: &str) -> reqwest::Response {
    client
        .post(format!("{address}/api/test/finalize"))
        .bearer_auth(token)
        .send()
        .await
        .expect("Finalize request failed")
}

#[tokio::test]
async fn full_flow_perfect_score_lists_and_exports() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&address, &client).await;
    let bank = QuestionBank::load(None).unwrap();

    let start = start_test(&address, &client, &token, json!({})).await;
    assert_eq!(start.status().as_u16(), 201);
    let start_body: Value = start.json().await.unwrap();
    assert_eq!(start_body["total_questions"], 30);
    assert_eq!(start_body["duration_secs"], 1800);

    // Walk the whole form, answering every question correctly.
    for _ in 0..30 {
        let page = current(&address, &client, &token).await;
        let question_id = page["question"]["id"].as_str().unwrap().to_string();
        assert!(
            page["question"].get("answer").is_none(),
            "correct answer must never reach the client"
        );
        let correct = bank.get(&question_id).unwrap().answer.clone();
        let resp = submit(&address, &client, &token, &question_id, Some(&correct), false, "next").await;
        assert_eq!(resp.status().as_u16(), 200);
    }

    let fin = finalize(&address, &client, &token).await;
    assert_eq!(fin.status().as_u16(), 200);
    let result: Value = fin.json().await.unwrap();
    assert_eq!(result["total_score"], 1600);
    assert_eq!(result["math_score"], 800);
    assert_eq!(result["rw_score"], 800);
    assert_eq!(result["correct_count"], 30);
    assert_eq!(result["total_answered"], 30);
    assert_eq!(result["weaknesses"].as_array().unwrap().len(), 0);
    let result_id = result["result_id"].as_i64().unwrap();

    // Dashboard listing
    let listing: Value = client
        .get(format!("{address}/api/results"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rows = listing.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"].as_i64().unwrap(), result_id);
    assert_eq!(rows[0]["total_score"], 1600);

    // Detail view
    let detail: Value = client
        .get(format!("{address}/api/results/{result_id}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["outcomes"].as_array().unwrap().len(), 30);
    assert!(detail["outcomes"][0]["correct"].as_bool().unwrap());

    // CSV export
    let report = client
        .get(format!("{address}/api/results/{result_id}/report.csv"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(report.status().as_u16(), 200);
    assert!(
        report
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/csv")
    );
    let body = report.text().await.unwrap();
    assert!(body.starts_with("Question Number,Section,Skill Type"));
    assert!(body.contains("m1"));
    assert!(body.contains("rw20"));
    // header + one row per question
    assert_eq!(body.lines().count(), 31);
}

#[tokio::test]
async fn answer_round_trips_after_navigating_back() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&address, &client).await;

    start_test(&address, &client, &token, json!({})).await;

    let resp = submit(&address, &client, &token, "m1", Some("7"), true, "next").await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["cursor"], 1);

    // Navigate back without touching the stored answer.
    let resp = submit(&address, &client, &token, "m2", None, false, "back").await;
    assert_eq!(resp.status().as_u16(), 200);

    let page = current(&address, &client, &token).await;
    assert_eq!(page["question"]["id"], "m1");
    assert_eq!(page["selected_answer"], "7");
    assert_eq!(page["marked_for_review"], true);
    assert_eq!(page["position"], 1);
}

#[tokio::test]
async fn cursor_clamps_at_both_ends() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&address, &client).await;

    start_test(&address, &client, &token, json!({})).await;

    // Back at the first question is a no-op.
    let resp = submit(&address, &client, &token, "m1", None, false, "back").await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["cursor"], 0);

    // Walk to the last question.
    for _ in 0..29 {
        let page = current(&address, &client, &token).await;
        let question_id = page["question"]["id"].as_str().unwrap().to_string();
        submit(&address, &client, &token, &question_id, None, false, "next").await;
    }

    let page = current(&address, &client, &token).await;
    assert_eq!(page["question"]["id"], "rw20");
    assert_eq!(page["position"], 30);

    // Next at the last question is a no-op.
    let resp = submit(&address, &client, &token, "rw20", None, false, "next").await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["cursor"], 29);
    assert_eq!(body["at_last_question"], true);
}

#[tokio::test]
async fn stale_or_unknown_question_ids_are_rejected() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&address, &client).await;

    start_test(&address, &client, &token, json!({})).await;

    // A real question that is not at the cursor: stale form replay.
    let stale = submit(&address, &client, &token, "m5", Some("5"), false, "next").await;
    assert_eq!(stale.status().as_u16(), 409);

    // An id that is not part of the form at all.
    let unknown = submit(&address, &client, &token, "zzz", Some("A"), false, "next").await;
    assert_eq!(unknown.status().as_u16(), 404);

    // Neither rejection moved the cursor.
    let page = current(&address, &client, &token).await;
    assert_eq!(page["question"]["id"], "m1");
}

#[tokio::test]
async fn multiple_choice_answers_must_be_offered_choices() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&address, &client).await;

    start_test(&address, &client, &token, json!({})).await;

    let resp = submit(&address, &client, &token, "m1", Some("not-a-choice"), false, "next").await;
    assert_eq!(resp.status().as_u16(), 400);

    let page = current(&address, &client, &token).await;
    assert_eq!(page["question"]["id"], "m1");
    assert!(page["selected_answer"].is_null());
}

#[tokio::test]
async fn review_flag_updates_without_moving_the_cursor() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&address, &client).await;

    start_test(&address, &client, &token, json!({})).await;

    let resp = client
        .post(format!("{address}/api/test/review"))
        .bearer_auth(&token)
        .json(&json!({ "question_id": "m1", "flag": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let page = current(&address, &client, &token).await;
    assert_eq!(page["question"]["id"], "m1");
    assert_eq!(page["marked_for_review"], true);
    assert_eq!(page["position"], 1);

    // Flags for questions outside the form are rejected.
    let unknown = client
        .post(format!("{address}/api/test/review"))
        .bearer_auth(&token)
        .json(&json!({ "question_id": "nope", "flag": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status().as_u16(), 404);
}

#[tokio::test]
async fn start_conflicts_until_reset() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&address, &client).await;

    let first = start_test(&address, &client, &token, json!({})).await;
    assert_eq!(first.status().as_u16(), 201);

    let second = start_test(&address, &client, &token, json!({})).await;
    assert_eq!(second.status().as_u16(), 409);

    let reset = client
        .post(format!("{address}/api/test/reset"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(reset.status().as_u16(), 200);

    let third = start_test(&address, &client, &token, json!({})).await;
    assert_eq!(third.status().as_u16(), 201);
}

#[tokio::test]
async fn finalize_is_guarded_against_repeats() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&address, &client).await;

    start_test(&address, &client, &token, json!({})).await;
    submit(&address, &client, &token, "m1", Some("7"), false, "next").await;

    let first = finalize(&address, &client, &token).await;
    assert_eq!(first.status().as_u16(), 200);

    let second = finalize(&address, &client, &token).await;
    assert_eq!(second.status().as_u16(), 404);

    // The finalized result survives a reset untouched.
    client
        .post(format!("{address}/api/test/reset"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let listing: Value = client
        .get(format!("{address}/api/results"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn expired_attempt_still_accepts_answers_and_finalizes() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&address, &client).await;

    let start = start_test(&address, &client, &token, json!({ "duration_secs": 1 })).await;
    assert_eq!(start.status().as_u16(), 201);

    tokio::time::sleep(Duration::from_millis(1300)).await;

    let status: Value = client
        .get(format!("{address}/api/test/status"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["expired"], true);
    assert_eq!(status["time_remaining_secs"], 0);

    // Expiry never blocks: captured answers still land.
    let late = submit(&address, &client, &token, "m1", Some("7"), false, "next").await;
    assert_eq!(late.status().as_u16(), 200);

    let fin = finalize(&address, &client, &token).await;
    assert_eq!(fin.status().as_u16(), 200);
    let result: Value = fin.json().await.unwrap();
    // Elapsed is capped at the one-second deadline.
    assert_eq!(result["elapsed_secs"], 1);
    assert_eq!(result["correct_count"], 1);
    assert_eq!(result["total_answered"], 1);
    // Everything unanswered scored as incorrect.
    assert_eq!(result["total_score"].as_i64().unwrap(), 200 + 60 + 200);
}

#[tokio::test]
async fn start_rejects_non_positive_durations() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&address, &client).await;

    let resp = start_test(&address, &client, &token, json!({ "duration_secs": 0 })).await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn results_are_private_to_their_owner() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let owner = register_and_login(&address, &client).await;
    start_test(&address, &client, &owner, json!({})).await;
    let fin: Value = finalize(&address, &client, &owner).await.json().await.unwrap();
    let result_id = fin["result_id"].as_i64().unwrap();

    let intruder = register_and_login(&address, &client).await;
    let resp = client
        .get(format!("{address}/api/results/{result_id}"))
        .bearer_auth(&intruder)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);

    let missing = client
        .get(format!("{address}/api/results/999999"))
        .bearer_auth(&intruder)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}

#[tokio::test]
async fn operations_without_an_attempt_report_no_active_session() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&address, &client).await;

    let page = client
        .get(format!("{address}/api/test/current"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(page.status().as_u16(), 404);

    let fin = finalize(&address, &client, &token).await;
    assert_eq!(fin.status().as_u16(), 404);

    // Reset is idempotent even with nothing to discard.
    let reset = client
        .post(format!("{address}/api/test/reset"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(reset.status().as_u16(), 200);
}
