//! Centralized path functions for all storage locations.
//!
//! Single source of truth for where job records and result streams live.

use std::path::{Path, PathBuf};

use sensorhub_types::JobId;

/// App data root: `~/Library/Application Support/sensorhub/` (macOS) or `~/.local/share/sensorhub/` (Linux).
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("sensorhub"))
}

/// Default job directory: `<app_data_dir>/jobs/`, falling back to `./jobs`.
pub fn default_job_dir() -> PathBuf {
    app_data_dir()
        .map(|d| d.join("jobs"))
        .unwrap_or_else(|| PathBuf::from("jobs"))
}

/// Job metadata record: `<job_dir>/<id>.json`.
pub fn job_record_path(job_dir: &Path, id: JobId) -> PathBuf {
    job_dir.join(format!("{id}.json"))
}

/// Result stream file: `<job_dir>/<id>.bin`. External tooling reads these
/// files directly, so the name must not change.
pub fn stream_path(job_dir: &Path, id: JobId) -> PathBuf {
    job_dir.join(format!("{id}.bin"))
}

/// Suffix of scratch files that are renamed into place once fully written.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Name prefix of scratch files for `path`: `1001.json` gets `1001.json.<random>.part`.
pub fn partial_prefix(path: &Path) -> String {
    let name = path.file_name().unwrap_or(path.as_os_str());
    format!("{}.", name.to_string_lossy())
}

/// Parse the job id out of a record file name such as `1001.json`.
pub fn job_id_from_record(path: &Path) -> Option<JobId> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}
