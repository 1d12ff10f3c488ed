// src/config.rs

use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    /// Optional path to a question-bank JSON file; the bundled catalog is
    /// used when unset.
    pub question_bank_path: Option<String>,
    /// Default test duration when the start request does not supply one.
    pub test_duration_secs: i64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://satinsight.db".to_string());

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86_400);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let question_bank_path = env::var("QUESTION_BANK_PATH").ok();

        let test_duration_secs = env::var("TEST_DURATION_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1_800);

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            question_bank_path,
            test_duration_secs,
        }
    }
}
