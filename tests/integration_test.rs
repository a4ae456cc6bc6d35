//! Integration tests for the balancer.
//!
//! These tests verify the complete flow over real sockets:
//! - round-robin rotation across backends
//! - permanent exclusion of unreachable backends
//! - behavior when every backend is down
//! - byte-for-byte relay fidelity and half-close propagation
//! - concurrent connections and graceful shutdown

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use tcplb::{CancellationToken, Config, TimeoutConfig};

// ============================================================================
// Test Helpers: Mock Backends
// ============================================================================

struct Backend {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Backend {
    /// Simulate a crashed backend: the listener is dropped and further
    /// connects are refused.
    fn stop(&self) {
        self.handle.abort();
    }

    fn target(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A backend that greets every connection with a fixed tag, then closes
/// its write side. Lets a client identify which backend served it.
async fn start_tag_backend(tag: &'static str) -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = stream.write_all(tag.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    Backend { addr, handle }
}

/// A backend that echoes back whatever it receives.
async fn start_echo_backend() -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    Backend { addr, handle }
}

/// A backend that consumes its input to EOF, then responds. Only works
/// if the client's half-close propagates through the relay.
async fn start_consume_then_respond_backend() -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut received = Vec::new();
                if stream.read_to_end(&mut received).await.is_ok() {
                    let reply = format!("got {} bytes", received.len());
                    let _ = stream.write_all(reply.as_bytes()).await;
                }
                let _ = stream.shutdown().await;
            });
        }
    });

    Backend { addr, handle }
}

/// A dead target: the port was bound and released, so connects are refused.
async fn dead_target() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

// ============================================================================
// Test Helper: Balancer
// ============================================================================

async fn start_balancer(targets: Vec<String>) -> (SocketAddr, CancellationToken) {
    // Find an available port.
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let config = Config {
        listen: addr,
        targets,
        timeouts: TimeoutConfig {
            connect_timeout_secs: 2,
            idle_timeout_secs: 30,
            relay_buffer_size: 4096,
        },
        ..Default::default()
    };

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        let _ = tcplb::run_with_shutdown(config, token).await;
    });

    // Wait for the listener to come up.
    tokio::time::sleep(Duration::from_millis(200)).await;

    (addr, shutdown)
}

/// Connect through the balancer and read everything the backend sends.
async fn fetch_tag(balancer: SocketAddr) -> String {
    let mut stream = TcpStream::connect(balancer).await.unwrap();
    let mut tag = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut tag))
        .await
        .expect("read timeout")
        .unwrap();
    String::from_utf8(tag).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

/// With K healthy backends, sequential request i is served by backend
/// (i-1) mod K.
#[tokio::test]
async fn round_robin_rotation_order() {
    let t1 = start_tag_backend("T1").await;
    let t2 = start_tag_backend("T2").await;

    let (balancer, shutdown) = start_balancer(vec![t1.target(), t2.target()]).await;

    assert_eq!(fetch_tag(balancer).await, "T1");
    assert_eq!(fetch_tag(balancer).await, "T2");
    assert_eq!(fetch_tag(balancer).await, "T1");
    assert_eq!(fetch_tag(balancer).await, "T2");

    shutdown.cancel();
}

/// A target that is down at startup is excluded on first contact and the
/// client is transparently served by the next one.
#[tokio::test]
async fn falls_back_past_a_dead_target() {
    let dead = dead_target().await;
    let t1 = start_tag_backend("T1").await;

    let (balancer, shutdown) = start_balancer(vec![dead, t1.target()]).await;

    // Rotation points at the dead target first; the client never notices.
    assert_eq!(fetch_tag(balancer).await, "T1");
    // The dead target stays excluded.
    assert_eq!(fetch_tag(balancer).await, "T1");
    assert_eq!(fetch_tag(balancer).await, "T1");

    shutdown.cancel();
}

/// A backend that fails mid-run is excluded after one failed connect and
/// never selected again.
#[tokio::test]
async fn excludes_a_backend_that_dies_mid_run() {
    let t1 = start_tag_backend("T1").await;
    let t2 = start_tag_backend("T2").await;

    let (balancer, shutdown) = start_balancer(vec![t1.target(), t2.target()]).await;

    assert_eq!(fetch_tag(balancer).await, "T1");
    assert_eq!(fetch_tag(balancer).await, "T2");

    // Rotation would pick T1 next; kill it.
    t1.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Served by T2 after T1 is excluded, and from then on always T2.
    for _ in 0..5 {
        assert_eq!(fetch_tag(balancer).await, "T2");
    }

    shutdown.cancel();
}

/// When every target is unreachable, the client connection is closed
/// without any data.
#[tokio::test]
async fn closes_client_when_all_targets_are_down() {
    let (balancer, shutdown) =
        start_balancer(vec![dead_target().await, dead_target().await]).await;

    for _ in 0..3 {
        let mut stream = TcpStream::connect(balancer).await.unwrap();
        let mut buf = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .expect("read timeout")
            .unwrap();
        assert_eq!(n, 0, "client must receive no data");
    }

    shutdown.cancel();
}

/// Byte-for-byte fidelity through the relay for a stream larger than the
/// relay buffer, written in uneven chunks.
#[tokio::test]
async fn relays_one_megabyte_unmodified() {
    let echo = start_echo_backend().await;
    let (balancer, shutdown) = start_balancer(vec![echo.target()]).await;

    let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i * 31 % 251) as u8).collect();
    let expected = payload.clone();

    let stream = TcpStream::connect(balancer).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();

    // Writer and reader must run concurrently or the relay back-pressures.
    let writer_task = tokio::spawn(async move {
        let mut offset = 0;
        let mut chunk = 1;
        while offset < payload.len() {
            let end = (offset + chunk).min(payload.len());
            writer.write_all(&payload[offset..end]).await.unwrap();
            offset = end;
            // Uneven partial writes, up to ~28 KiB.
            chunk = (chunk * 7 % 28901) + 1;
        }
        writer.shutdown().await.unwrap();
    });

    let mut received = Vec::with_capacity(expected.len());
    tokio::time::timeout(Duration::from_secs(30), reader.read_to_end(&mut received))
        .await
        .expect("read timeout")
        .unwrap();

    writer_task.await.unwrap();
    assert_eq!(received.len(), expected.len());
    assert_eq!(received, expected);

    shutdown.cancel();
}

/// Client-side half-close propagates to the backend as EOF, and the
/// response still flows back on the open direction.
#[tokio::test]
async fn half_close_propagates_to_the_backend() {
    let backend = start_consume_then_respond_backend().await;
    let (balancer, shutdown) = start_balancer(vec![backend.target()]).await;

    let mut stream = TcpStream::connect(balancer).await.unwrap();
    stream.write_all(b"ping").await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("read timeout")
        .unwrap();

    assert_eq!(response, b"got 4 bytes");

    shutdown.cancel();
}

/// Concurrent clients all get their own data back; one connection's
/// traffic never leaks into another's.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connections_are_independent() {
    let e1 = start_echo_backend().await;
    let e2 = start_echo_backend().await;
    let (balancer, shutdown) = start_balancer(vec![e1.target(), e2.target()]).await;

    let mut handles = Vec::new();
    for i in 0..16 {
        handles.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(balancer).await?;
            let message = format!("connection {i} payload");
            stream.write_all(message.as_bytes()).await?;
            stream.shutdown().await?;

            let mut echoed = Vec::new();
            tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut echoed))
                .await
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timeout"))??;

            assert_eq!(echoed, message.as_bytes());
            Ok::<_, std::io::Error>(())
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    shutdown.cancel();
}

/// Cancelling the token stops the accept loop; new connections are
/// refused afterwards.
#[tokio::test]
async fn shutdown_stops_accepting() {
    let t1 = start_tag_backend("T1").await;
    let (balancer, shutdown) = start_balancer(vec![t1.target()]).await;

    assert_eq!(fetch_tag(balancer).await, "T1");

    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let result =
        tokio::time::timeout(Duration::from_secs(1), TcpStream::connect(balancer)).await;
    match result {
        Ok(Ok(_)) => panic!("connect should fail after shutdown"),
        Ok(Err(_)) | Err(_) => {}
    }
}
