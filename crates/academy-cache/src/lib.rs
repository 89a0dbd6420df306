//! Academy Cache - encrypted local persistence for one JSON document
//!
//! The cache is always encrypted on disk. Contents are cleared on a fixed
//! schedule and the key is rotated periodically, re-encrypting what is there.

pub mod config;
pub mod error;
pub mod scheduler;
pub mod store;

pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use store::{CacheRead, CacheState, CacheStore, RotationReport};
