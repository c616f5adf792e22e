// crates/core/src/authz.rs
//! Authorization decisions for job operations.
//!
//! Every decision is a pure function of the requestor and, where relevant, the
//! owning user id. The store calls these before any disclosure or mutation.

use sensorhub_types::{Permission, Requestor};

pub fn can_read(requestor: &Requestor, owner_id: &str) -> bool {
    requestor.has(Permission::JobsReadAll) || is_owner(requestor, owner_id)
}

/// Update and delete follow the read rule, keyed on the write-all permission.
pub fn can_write(requestor: &Requestor, owner_id: &str) -> bool {
    requestor.has(Permission::JobsWriteAll) || is_owner(requestor, owner_id)
}

pub fn can_create_pivot(requestor: &Requestor) -> bool {
    requestor.has(Permission::JobsPivot)
}

/// Sensor agents need this to poll for and report on jobs.
pub fn can_process(requestor: &Requestor) -> bool {
    requestor.has(Permission::JobsProcess)
}

fn is_owner(requestor: &Requestor, owner_id: &str) -> bool {
    !requestor.user_id.is_empty() && requestor.user_id == owner_id
}
