//! Core application layer
//!
//! Configuration, structured logging, the error type and small shared
//! helpers, plus the CBZ archive reader.

pub mod archive;
pub mod config;
pub mod error;
pub mod logging;
pub mod utils;

pub use archive::{ArchivePage, ArchiveReader};
pub use config::Config;
pub use error::{ErrorResponse, MangoonError, Result};
pub use logging::Logger;
