//! Keystep Common Library
//!
//! Shared scenario types, text normalisation and configuration for the
//! keystep workspace.

pub mod config;
pub mod error;
pub mod normalize;
pub mod types;

pub use config::KeystepConfig;
pub use error::{Error, Result};
pub use types::*;

/// Keystep version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
