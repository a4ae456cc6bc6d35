//! Error types for the balancer.

use thiserror::Error;

/// Errors that can occur while configuring or running the balancer.
#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    /// The registry had no endpoints when a connection arrived.
    #[error("no endpoints in rotation")]
    EmptyRegistry,

    /// Every remaining endpoint failed to connect and was excluded.
    #[error("all targets exhausted")]
    AllTargetsExhausted,
}
