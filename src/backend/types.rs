use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Body of `POST /run_strategy`. Dates serialize as `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub strategy: String, // e.g. "swing" or "momentum"
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub symbols_file: String,
}

impl RunRequest {
    pub fn new(strategy: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate, config: &Config) -> Self {
        Self {
            strategy: strategy.into(),
            start_date,
            end_date,
            symbols_file: config.symbols_file.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginUrlResponse {
    pub login_url: Option<String>,
}
