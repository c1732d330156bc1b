//! Timestamped persistence of the grand report.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// `analysis_<ISO-8601 with ':' and '.' replaced by '-'>.json`
pub fn report_file_name(now: DateTime<Utc>) -> String {
    format!("analysis_{}.json", now.format("%Y-%m-%dT%H-%M-%S-%3fZ"))
}

/// Write `json` under `dir` (created if missing) and return the file path.
pub fn persist_report(dir: &Path, json: &str, now: DateTime<Utc>) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(report_file_name(now));
    std::fs::write(&path, json)?;
    Ok(path)
}
