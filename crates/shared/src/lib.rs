//! # aldatu-shared
//!
//! Cross-cutting pieces used by the Aldatu binaries: configuration
//! loading from `.env` files and environment variables, and tracing
//! initialisation.

pub mod config;
pub mod telemetry;

pub use config::{ConfigError, ConfigLoader, WorkerConfig};
pub use telemetry::init_tracing;
