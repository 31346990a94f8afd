//! Configuration — read once from the environment at startup.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram Bot API token.
    pub bot_token: SecretString,
    /// Path to the questions JSON file exported from the form service.
    pub questions_path: String,
    /// Path to the local database file.
    pub db_path: String,
    /// Time-to-live for session keys; abandoned sessions expire after this.
    pub session_ttl: Duration,
    /// Mirror each committed answer into its sheet cell as it arrives.
    pub incremental_writes: bool,
    /// Results sink (Google Sheets) credentials.
    pub sheets: SheetsConfig,
}

/// Google Sheets credentials for the results sink.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
}

impl Config {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let session_ttl_secs: u64 = optional_env("SESSION_TTL_SECS")
            .unwrap_or_else(|| "3600".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue {
                key: "SESSION_TTL_SECS".into(),
                message: format!("{e}"),
            })?;

        Ok(Self {
            bot_token: SecretString::from(required_env("BOT_TOKEN")?),
            questions_path: optional_env("QUESTIONS_PATH")
                .unwrap_or_else(|| "questions.json".to_string()),
            db_path: optional_env("DB_PATH").unwrap_or_else(|| "./data/survey.db".to_string()),
            session_ttl: Duration::from_secs(session_ttl_secs),
            incremental_writes: optional_env("INCREMENTAL_WRITES")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            sheets: SheetsConfig {
                spreadsheet_id: required_env("SPREADSHEET_ID")?,
                client_id: required_env("GOOGLE_CLIENT_ID")?,
                client_secret: SecretString::from(required_env("GOOGLE_CLIENT_SECRET")?),
                refresh_token: SecretString::from(required_env("GOOGLE_REFRESH_TOKEN")?),
            },
        })
    }
}

fn required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bot_token_is_reported() {
        // from_env with a clean env should fail on the first required var.
        // Guard against a token leaking in from the host environment.
        if std::env::var("BOT_TOKEN").is_ok() {
            return;
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "BOT_TOKEN"));
    }
}
