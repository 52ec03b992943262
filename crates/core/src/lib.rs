pub mod config;
pub mod error;

pub use config::{AutoScanConfig, Config, ExecutorConfig};
pub use error::*;
