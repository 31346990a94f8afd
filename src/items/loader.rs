//! Item source loader — reads the questions JSON exported from the form
//! service. Called once at startup; failure is fatal.

use std::path::Path;

use crate::error::ConfigError;
use crate::items::model::RawForm;

/// Load the raw item definitions from a JSON file.
pub async fn load_definitions(path: &Path) -> Result<RawForm, ConfigError> {
    let data = tokio::fs::read_to_string(path).await?;
    let form: RawForm =
        serde_json::from_str(&data).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    tracing::info!(path = %path.display(), items = form.items.len(), "Item definitions loaded");
    Ok(form)
}
