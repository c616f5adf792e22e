// crates/types/src/requestor.rs
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capabilities a requestor may hold beyond owning their own jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    /// Read every user's jobs.
    #[serde(rename = "jobs:read-all")]
    JobsReadAll,
    /// Update or delete every user's jobs.
    #[serde(rename = "jobs:write-all")]
    JobsWriteAll,
    /// Create pivot jobs.
    #[serde(rename = "jobs:pivot")]
    JobsPivot,
    /// Act as a sensor agent: poll for, start, complete and fail jobs.
    #[serde(rename = "jobs:process")]
    JobsProcess,
}

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::JobsReadAll,
        Permission::JobsWriteAll,
        Permission::JobsPivot,
        Permission::JobsProcess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::JobsReadAll => "jobs:read-all",
            Permission::JobsWriteAll => "jobs:write-all",
            Permission::JobsPivot => "jobs:pivot",
            Permission::JobsProcess => "jobs:process",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown permission: {0}")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

/// The authenticated identity attached to an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requestor {
    pub user_id: String,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
}

impl Requestor {
    /// A requestor that only holds ownership rights over their own jobs.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Parse a comma-separated permission list such as `jobs:read-all, jobs:pivot`.
    /// Blank entries are skipped.
    pub fn parse_permissions(list: &str) -> Result<BTreeSet<Permission>, UnknownPermission> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Permission::from_str)
            .collect()
    }
}
