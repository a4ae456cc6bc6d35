//! Outbound connection establishment to the next backend in rotation.
//!
//! Each attempt yields a tagged outcome: either a connected stream or the
//! endpoint that failed. The driving loop folds over the registry state,
//! excluding failed endpoints, until a connection succeeds or the
//! rotation is drained. Resolution failure is treated the same as a
//! connect failure.

use std::io;
use std::time::Duration;

use tokio::net::{TcpStream, lookup_host};
use tracing::{debug, warn};

use crate::config::{Config, TcpConfig};
use crate::error::BalancerError;
use crate::registry::{Endpoint, EndpointRegistry};

/// Outcome of a single connection attempt.
enum Attempt {
    Connected(TcpStream),
    Failed { endpoint: Endpoint, cause: io::Error },
}

/// Obtain one live target connection for an inbound client.
///
/// Fails with [`BalancerError::EmptyRegistry`] when no endpoints remain
/// before the first attempt, and [`BalancerError::AllTargetsExhausted`]
/// when the rotation drains during the retry loop. Excluded endpoints
/// never return for the lifetime of the process.
pub async fn connect_to_target(
    registry: &EndpointRegistry,
    config: &Config,
) -> Result<(TcpStream, Endpoint), BalancerError> {
    if registry.is_empty() {
        return Err(BalancerError::EmptyRegistry);
    }

    loop {
        let endpoint = match registry.next() {
            Some(e) => e,
            None => return Err(BalancerError::AllTargetsExhausted),
        };

        match attempt(&endpoint, config.connect_timeout(), &config.tcp).await {
            Attempt::Connected(stream) => {
                debug!(endpoint = %endpoint, "target connected");
                return Ok((stream, endpoint));
            }
            Attempt::Failed { endpoint, cause } => {
                warn!(endpoint = %endpoint, error = %cause, "connect failed, excluding endpoint");
                registry.exclude(&endpoint);
                if registry.is_empty() {
                    return Err(BalancerError::AllTargetsExhausted);
                }
            }
        }
    }
}

async fn attempt(endpoint: &Endpoint, connect_timeout: Duration, tcp: &TcpConfig) -> Attempt {
    match try_connect(endpoint, connect_timeout, tcp).await {
        Ok(stream) => Attempt::Connected(stream),
        Err(cause) => Attempt::Failed {
            endpoint: endpoint.clone(),
            cause,
        },
    }
}

async fn try_connect(
    endpoint: &Endpoint,
    connect_timeout: Duration,
    tcp: &TcpConfig,
) -> io::Result<TcpStream> {
    // First resolved address only, matching rotation semantics: a host
    // that resolves but does not answer is excluded, not retried on its
    // other addresses.
    let addr = lookup_host((endpoint.host.as_str(), endpoint.port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "hostname resolved to no addresses"))?;

    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;

    apply_tcp_options(&stream, tcp)?;
    Ok(stream)
}

/// Apply TCP socket options.
pub(crate) fn apply_tcp_options(stream: &TcpStream, config: &TcpConfig) -> io::Result<()> {
    stream.set_nodelay(config.no_delay)?;

    if config.keepalive_secs > 0 {
        let sock = socket2::SockRef::from(stream);
        let keepalive =
            socket2::TcpKeepalive::new().with_time(Duration::from_secs(config.keepalive_secs));
        sock.set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}
