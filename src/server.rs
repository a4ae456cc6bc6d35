//! Accept loop and per-connection handling.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::Config;
use crate::connector::{apply_tcp_options, connect_to_target};
use crate::error::BalancerError;
use crate::registry::EndpointRegistry;
use crate::relay::relay_bidirectional;

/// Run the balancer until the process is terminated.
pub async fn run(config: Config) -> Result<(), BalancerError> {
    run_with_shutdown(config, CancellationToken::new()).await
}

/// Run the balancer with a cancellation token for graceful stop.
///
/// Binds the listen address, then accepts connections until the token is
/// cancelled. Each connection runs on its own task: target acquisition,
/// then relay. A single connection's failure is logged and never stops
/// the accept loop.
pub async fn run_with_shutdown(
    config: Config,
    shutdown: CancellationToken,
) -> Result<(), BalancerError> {
    let registry = Arc::new(EndpointRegistry::new(config.endpoints()?));
    let config = Arc::new(config);

    let listener = TcpListener::bind(config.listen).await?;
    info!(address = %config.listen, targets = registry.len(), "listening");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("shutdown signal received, stopping accept loop");
                return Ok(());
            }

            result = listener.accept() => {
                let (client, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        // Transient accept failure (e.g. fd exhaustion)
                        // must not take the balancer down.
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                let registry = registry.clone();
                let config = config.clone();

                tokio::spawn(
                    async move {
                        if let Err(e) = handle_connection(client, &registry, &config).await {
                            warn!(error = %e, "connection error");
                        }
                    }
                    .instrument(info_span!("conn", peer = %peer)),
                );
            }
        }
    }
}

/// Handle one accepted client: acquire a target, relay, tear down.
///
/// Both streams are owned by this task and dropped (closed) on every
/// exit path, connector failure included.
async fn handle_connection(
    client: TcpStream,
    registry: &EndpointRegistry,
    config: &Config,
) -> Result<(), BalancerError> {
    apply_tcp_options(&client, &config.tcp)?;

    let (target, endpoint) = connect_to_target(registry, config).await?;
    debug!(endpoint = %endpoint, "relaying");

    let outcome = relay_bidirectional(
        client,
        target,
        config.idle_timeout(),
        config.timeouts.relay_buffer_size,
    )
    .await?;

    debug!(
        endpoint = %endpoint,
        to_target = outcome.client_to_target,
        to_client = outcome.target_to_client,
        "connection closed"
    );
    Ok(())
}
