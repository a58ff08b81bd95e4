//! Configuration error types.

use thiserror::Error;

/// Errors raised when a configuration cannot describe a usable pool.
///
/// Resolving a configuration from the environment never fails; these errors
/// come from validating hand-built configurations or parsing URLs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Minimum exceeds maximum, or maximum is zero.
    #[error("invalid pool size: min {min}, max {max}")]
    InvalidPoolSize {
        /// Configured minimum.
        min: u32,
        /// Configured maximum.
        max: u32,
    },

    /// A timeout that must be positive was zero.
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    /// A connection URL could not be parsed.
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),
}
