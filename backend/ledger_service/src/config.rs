//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use ledger_core::{Amount, BusinessCalendar};

use crate::errors::{Result, ServiceError};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Smallest withdrawal a user may request
    pub min_withdrawal: Amount,
    /// Upper bound on a single unit-of-work attempt
    pub uow_timeout: Duration,
    /// How many times a storage conflict is retried before surfacing
    pub uow_max_retries: u32,
    /// Directory holding deposit evidence uploads
    pub evidence_dir: PathBuf,
    /// Where the business day starts
    pub calendar: BusinessCalendar,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let calendar = match env_var("DAY_OFFSET_MINUTES") {
            Ok(raw) => raw
                .parse::<i32>()
                .ok()
                .and_then(BusinessCalendar::from_offset_minutes)
                .ok_or_else(|| ServiceError::Config("Invalid DAY_OFFSET_MINUTES".to_string()))?,
            Err(_) => BusinessCalendar::server_local(),
        };

        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./ledger.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| ServiceError::Config("Invalid API_PORT".to_string()))?,
            min_withdrawal: env_var("MIN_WITHDRAWAL")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| ServiceError::Config("Invalid MIN_WITHDRAWAL".to_string()))?,
            uow_timeout: Duration::from_millis(
                env_var("UOW_TIMEOUT_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()
                    .map_err(|_| ServiceError::Config("Invalid UOW_TIMEOUT_MS".to_string()))?,
            ),
            uow_max_retries: env_var("UOW_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ServiceError::Config("Invalid UOW_MAX_RETRIES".to_string()))?,
            evidence_dir: env_var("EVIDENCE_DIR")
                .unwrap_or_else(|_| "./uploads".to_string())
                .into(),
            calendar,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ServiceError::Config(format!("Missing env var: {key}")))
}
