// crates/core/src/lib.rs
//! Job dispatch core: the job store, node registry, authorization and
//! persistence of job records and result streams.

pub mod authz;
pub mod config;
pub mod error;
pub mod paths;
pub mod persistence;
pub mod registry;
pub mod store;

pub use config::StoreConfig;
pub use error::*;
pub use persistence::{FilePersistence, JobPersistence, PersistenceEngine, StreamReader};
pub use registry::NodeRegistry;
pub use store::{JobStore, FIRST_JOB_ID};
