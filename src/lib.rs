pub mod adapters;
pub mod auth;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::CliArgs;

pub use adapters::JsonLinesSink;
pub use auth::Authenticator;
pub use config::TapConfig;
pub use self::core::{ExtractionDriver, StreamDescriptor, SyncSummary, STREAMS};
pub use domain::model::{Partition, Record};
pub use domain::ports::{Clock, RecordSink};
pub use utils::error::{Result, TapError};
