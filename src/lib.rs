pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::core::{Orchestrator, PassReport};
pub use config::Settings;
pub use error::SyncError;
