//! DocQA Core Library
//!
//! Foundational utilities shared by the DocQA crates:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging infrastructure
//! - Application configuration (env + YAML)

pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use logging::LogFormat;
