// crates/types/src/job.rs
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

/// Job identifier. Allocated sequentially by the job store, never reused.
pub type JobId = u64;

/// Extension recorded on new jobs; the stored stream file is always `<id>.bin`.
pub const DEFAULT_FILE_EXTENSION: &str = "bin";

/// Lifecycle state of a job.
///
/// `Pending -> Assigned -> Running -> Completed | Failed`. An assigned job may
/// also fail before it starts. Deleted jobs are removed, not marked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Assigned => "assigned",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Assigned)
                | (JobStatus::Assigned, JobStatus::Running)
                | (JobStatus::Assigned, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a job entered the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    #[default]
    Ordinary,
    /// Follow-on investigation spawned from existing results. Needs the pivot permission.
    Pivot,
}

/// Parameters describing what a sensor should extract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase", default)]
pub struct JobFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    #[ts(type = "Record<string, unknown>")]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("end time {end} is before begin time {begin}")]
    InvertedTimeRange {
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl JobFilter {
    pub fn validate(&self) -> Result<(), FilterError> {
        if let (Some(begin), Some(end)) = (self.begin_time, self.end_time) {
            if end < begin {
                return Err(FilterError::InvertedTimeRange { begin, end });
            }
        }
        Ok(())
    }
}

/// Reference to the binary result payload stored alongside a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct ArtifactStream {
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the stored payload.
    pub sha256: String,
}

/// A unit of analysis work dispatched to a sensor node.
///
/// Unknown fields are ignored and missing fields take their defaults when a
/// record is read back, so older records stay loadable as fields are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase", default)]
pub struct Job {
    pub id: JobId,
    /// Owning user.
    pub user_id: String,
    /// Node the job is bound to. Empty means any node may claim it.
    pub node_id: String,
    pub status: JobStatus,
    pub kind: JobKind,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assign_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_time: Option<DateTime<Utc>>,
    pub fail_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub file_extension: String,
    pub filter: JobFilter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactStream>,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            id: 0,
            user_id: String::new(),
            node_id: String::new(),
            status: JobStatus::Pending,
            kind: JobKind::Ordinary,
            create_time: DateTime::<Utc>::default(),
            update_time: DateTime::<Utc>::default(),
            assign_time: None,
            complete_time: None,
            fail_time: None,
            fail_count: 0,
            error: None,
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            filter: JobFilter::default(),
            artifact: None,
        }
    }
}

impl Job {
    /// A pending, unassigned job owned by `user_id`, stamped with the current time.
    pub fn new(id: JobId, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            create_time: now,
            update_time: now,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: JobFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn is_unassigned(&self) -> bool {
        self.node_id.is_empty()
    }

    /// Whether `node_id` may claim this job. Node ids compare case-insensitively
    /// since they are derived from hostnames.
    pub fn is_claimable_by(&self, node_id: &str) -> bool {
        self.status == JobStatus::Pending
            && (self.is_unassigned() || self.node_id.eq_ignore_ascii_case(node_id))
    }

    pub fn is_bound_to(&self, node_id: &str) -> bool {
        !self.is_unassigned() && self.node_id.eq_ignore_ascii_case(node_id)
    }
}
