// crates/types/src/lib.rs
//! Shared data model for the sensor fleet control plane.

pub mod job;
pub mod node;
pub mod requestor;

pub use job::*;
pub use node::*;
pub use requestor::*;
