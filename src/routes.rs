// src/routes.rs

use axum::{
    Router, http::Method, middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{auth, results, session},
    state::AppState,
    utils::jwt::auth_middleware,
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, test session, results).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (pool, config, question bank).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    // The test-taking flow: every route needs an authenticated user.
    let test_routes = Router::new()
        .route("/start", post(session::start_test))
        .route("/current", get(session::current_question))
        .route("/answer", post(session::submit_answer))
        .route("/review", post(session::update_review_flag))
        .route("/status", get(session::test_status))
        .route("/finalize", post(session::finalize_test))
        .route("/reset", post(session::reset_test))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let result_routes = Router::new()
        .route("/", get(results::list_results))
        .route("/{id}", get(results::get_result))
        .route("/{id}/report.csv", get(results::download_report))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/test", test_routes)
        .nest("/api/results", result_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
