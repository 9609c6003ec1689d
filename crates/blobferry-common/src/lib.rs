//! Blobferry Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared ambient code for the blobferry workspace members:
//!
//! - **Error Handling**: the common error type and result alias
//! - **Logging**: tracing configuration and initialization
//!
//! # Example
//!
//! ```no_run
//! use blobferry_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("Application started");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{FerryError, Result};
