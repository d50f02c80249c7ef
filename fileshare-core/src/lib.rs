pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod models;
pub mod progress;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
pub use progress::{ConnectionRegistry, ProgressCorrelator};
