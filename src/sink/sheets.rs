//! Google Sheets results sink.
//!
//! Talks to the Sheets REST API directly: rows are appended under the
//! header, per-item cells land two columns right of the (user, datetime)
//! seed. Access tokens come from the OAuth2 refresh-token grant and are
//! cached in memory until shortly before expiry.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

use crate::config::SheetsConfig;
use crate::error::SinkError;
use crate::sink::ResultsSink;

const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SPREADSHEET_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Rows are appended within this range, right under the header row.
const APPEND_RANGE: &str = "A2:Z2";

/// Item cells start after the (user, datetime) seed columns.
const CELL_OFFSET: usize = 2;

/// Refresh the token this long before it actually expires.
const EXPIRY_MARGIN_SECS: i64 = 30;

static ROW_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)$").expect("valid row pattern"));

struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

/// Results sink backed by one Google Sheets spreadsheet.
pub struct SheetsSink {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    token: RwLock<Option<AccessToken>>,
}

impl SheetsSink {
    pub fn new(config: &SheetsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{SPREADSHEET_URL}/{}", config.spreadsheet_id),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            token: RwLock::new(None),
        }
    }

    /// Get a valid access token, refreshing through the OAuth2
    /// refresh-token grant when the cached one is missing or stale.
    async fn access_token(&self) -> Result<String, SinkError> {
        {
            let token = self.token.read().await;
            if let Some(t) = token.as_ref() {
                if t.is_valid(Utc::now()) {
                    return Ok(t.value.clone());
                }
            }
        }

        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token.expose_secret()),
        ];
        let resp = self
            .client
            .post(TOKEN_URI)
            .form(&form)
            .send()
            .await
            .map_err(|e| SinkError::Auth(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Auth(format!("token refresh failed: {status} {body}")));
        }
        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SinkError::Auth(e.to_string()))?;

        let value = data
            .get("access_token")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| SinkError::Auth("token response without access_token".into()))?
            .to_string();
        let expires_in = data
            .get("expires_in")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);

        let mut token = self.token.write().await;
        *token = Some(AccessToken {
            value: value.clone(),
            expires_at: Utc::now() + Duration::seconds(expires_in),
        });
        tracing::debug!("Sheets access token refreshed");
        Ok(value)
    }

    /// Append a row and return the row number reported back by the API.
    async fn append(&self, values: &[String]) -> Result<i64, SinkError> {
        let token = self.access_token().await?;
        let url = format!("{}/values/{APPEND_RANGE}:append", self.base_url);
        let body = serde_json::json!({ "values": [values] });

        let resp = self
            .client
            .post(&url)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Write(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Write(format!("append failed: {status} {body}")));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SinkError::InvalidResponse(e.to_string()))?;
        let updated_range = data
            .get("updates")
            .and_then(|u| u.get("updatedRange"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| SinkError::InvalidResponse("append response without updatedRange".into()))?;
        parse_row_number(updated_range)
            .ok_or_else(|| SinkError::InvalidResponse(format!("unparseable range: {updated_range}")))
    }
}

/// Extract the trailing row number from an A1-style range like
/// `'Sheet1'!A7:C7`.
fn parse_row_number(range: &str) -> Option<i64> {
    ROW_NUMBER
        .captures(range)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Column letter for an item index, after the seed columns.
fn column_letter(index: usize) -> Result<char, SinkError> {
    let slot = index + CELL_OFFSET;
    if slot >= 26 {
        return Err(SinkError::Write(format!(
            "item index {index} beyond the last sheet column"
        )));
    }
    Ok((b'A' + slot as u8) as char)
}

#[async_trait]
impl ResultsSink for SheetsSink {
    async fn append_row(&self, values: &[String]) -> Result<(), SinkError> {
        let row = self.append(values).await?;
        tracing::info!(row, "Answer row appended");
        Ok(())
    }

    async fn open_row(&self, seed: &[String]) -> Result<i64, SinkError> {
        self.append(seed).await
    }

    async fn write_cell(&self, row: i64, index: usize, values: &[String]) -> Result<(), SinkError> {
        let column = column_letter(index)?;
        let token = self.access_token().await?;
        let url = format!("{}/values/{column}{row}", self.base_url);
        let body = serde_json::json!({ "values": [[values.join(", ")]] });

        let resp = self
            .client
            .put(&url)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Write(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Write(format!("cell write failed: {status} {body}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_number_parses_from_a1_ranges() {
        assert_eq!(parse_row_number("'Sheet1'!A7:C7"), Some(7));
        assert_eq!(parse_row_number("Answers!B123"), Some(123));
        assert_eq!(parse_row_number("A2:Z2"), Some(2));
        assert_eq!(parse_row_number("Sheet1"), None);
    }

    #[test]
    fn column_letters_skip_the_seed_columns() {
        assert_eq!(column_letter(0).unwrap(), 'C');
        assert_eq!(column_letter(1).unwrap(), 'D');
        assert_eq!(column_letter(23).unwrap(), 'Z');
        assert!(column_letter(24).is_err());
    }

    #[test]
    fn token_validity_honors_the_margin() {
        let now = Utc::now();
        let fresh = AccessToken {
            value: "t".into(),
            expires_at: now + Duration::seconds(3600),
        };
        assert!(fresh.is_valid(now));

        let nearly_expired = AccessToken {
            value: "t".into(),
            expires_at: now + Duration::seconds(EXPIRY_MARGIN_SECS - 1),
        };
        assert!(!nearly_expired.is_valid(now));
    }

    #[tokio::test]
    async fn append_with_bogus_credentials_fails() {
        let sink = SheetsSink::new(&SheetsConfig {
            spreadsheet_id: "sheet".into(),
            client_id: "id".into(),
            client_secret: SecretString::from("secret"),
            refresh_token: SecretString::from("refresh"),
        });
        let result = sink.append_row(&["a".to_string()]).await;
        assert!(result.is_err());
    }
}
