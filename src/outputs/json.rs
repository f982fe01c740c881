//! JSON output of aggregation results.
//!
//! Files are organized by date, one file per category:
//! ```text
//! json_output_dir/
//! └── 2025-05-06/
//!     ├── sport.json
//!     └── business.json
//! ```
//! A later run for the same day and category overwrites the earlier file.

use crate::errors::NewsResult;
use crate::models::FetchResponse;
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// `{json_output_dir}/{date}/{category}.json`
pub fn response_path(json_output_dir: &Path, date: &str, category: &str) -> PathBuf {
    json_output_dir.join(date).join(format!("{category}.json"))
}

/// Write a [`FetchResponse`] under today's date directory.
///
/// # Arguments
///
/// * `response` - The aggregation result to serialize
/// * `json_output_dir` - Base directory for JSON output
///
/// # Returns
///
/// The path written, or an error if directory creation or file writing fails.
///
/// # Output Path
///
/// The file is written to: `{json_output_dir}/{local date}/{category}.json`
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir.display()))]
pub async fn write_response(response: &FetchResponse, json_output_dir: &Path) -> NewsResult<PathBuf> {
    let local_date = Local::now().date_naive().to_string();
    write_response_for_date(response, json_output_dir, &local_date).await
}

pub async fn write_response_for_date(
    response: &FetchResponse,
    json_output_dir: &Path,
    date: &str,
) -> NewsResult<PathBuf> {
    let json = serde_json::to_string_pretty(response)?;
    let path = response_path(json_output_dir, date, &response.category);

    if let Some(dir) = path.parent() {
        info!(dir = %dir.display(), "Ensuring JSON directory exists");
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
            return Err(e.into());
        }
    }

    info!(path = %path.display(), "Writing JSON");
    fs::write(&path, json).await?;
    info!(path = %path.display(), articles = response.articles.len(), "Wrote JSON file");
    Ok(path)
}
