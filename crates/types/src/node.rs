// crates/types/src/node.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A registered remote sensor agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Stable id, usually the sensor's hostname.
    pub id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    /// Last time the node registered or polled.
    #[serde(default)]
    pub update_time: DateTime<Utc>,
    /// Last time the node asked for work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetch: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            role: String::new(),
            description: String::new(),
            address: String::new(),
            create_time: now,
            update_time: now,
            last_fetch: None,
        }
    }
}
