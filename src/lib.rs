pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod service;
pub mod shutdown;
pub mod types;

pub use config::Config;
pub use error::ProbeError;
