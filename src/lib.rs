//! Transparent round-robin TCP load balancer.
//!
//! Accepts client connections, picks the next backend endpoint in
//! rotation, connects to it and relays bytes in both directions until
//! either side closes. Backends that fail to connect are permanently
//! excluded from rotation for the lifetime of the process.
//!
//! The library surface exists for the binary and for integration tests.

pub mod cli;
mod config;
mod connector;
mod error;
mod registry;
mod relay;
mod server;

pub use config::{Config, LoggingConfig, TcpConfig, TimeoutConfig, load_config, split_target_list};
pub use error::BalancerError;
pub use registry::{Endpoint, EndpointRegistry};
pub use relay::{RelayOutcome, relay_bidirectional};
pub use server::{run, run_with_shutdown};
pub use tokio_util::sync::CancellationToken;
