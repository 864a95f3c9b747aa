#![forbid(unsafe_code)]

mod error;
mod observe;
mod registry;
mod rows;
mod scheduler;

pub use error::EngineError;
pub use observe::{CommitNotification, SubscriptionId};
pub use registry::PluginRegistry;
pub use rows::{TableDiffPlugin, TableSpec};
pub use scheduler::{TrackState, TrackerEngine};
