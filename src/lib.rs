pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod jobs;
pub mod logging;
pub mod pacer;
pub mod shopify;
pub mod table;
pub mod vtex;

pub use config::Config;
pub use error::{ConfigError, SyncError};
pub use table::{Record, Table};
