//! Backend endpoints and the round-robin rotation registry.
//!
//! The registry is the only state shared between connection tasks. It is
//! a queue of endpoints guarded by a mutex: `next()` rotates the front to
//! the back, `exclude()` permanently removes an endpoint after a failed
//! connect. Excluded endpoints are never re-admitted for the lifetime of
//! the process.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::BalancerError;

/// A single backend target, identified structurally by host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bracket raw IPv6 literals so the output parses back.
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = BalancerError;

    /// Parse `host:port`, with IPv6 bracket notation: `[::1]:443`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // IPv6 bracket notation: [::1]:443
        if let Some(rest) = s.strip_prefix('[') {
            let (host, port_str) = rest
                .split_once("]:")
                .ok_or_else(|| BalancerError::Config(format!("invalid endpoint: {s}")))?;
            if host.is_empty() {
                return Err(BalancerError::Config(format!("empty host in endpoint: {s}")));
            }
            let port = port_str
                .parse::<u16>()
                .map_err(|_| BalancerError::Config(format!("invalid port in endpoint: {s}")))?;
            return Ok(Endpoint::new(host, port));
        }

        let (host, port_str) = s
            .rsplit_once(':')
            .ok_or_else(|| BalancerError::Config(format!("missing port in endpoint: {s}")))?;
        if host.is_empty() {
            return Err(BalancerError::Config(format!("empty host in endpoint: {s}")));
        }
        if host.contains(':') {
            return Err(BalancerError::Config(format!(
                "ipv6 host must be bracketed in endpoint: {s}"
            )));
        }
        let port = port_str
            .parse::<u16>()
            .map_err(|_| BalancerError::Config(format!("invalid port in endpoint: {s}")))?;
        Ok(Endpoint::new(host, port))
    }
}

/// Round-robin rotation over the configured endpoints.
///
/// Shared across connection tasks via `Arc<EndpointRegistry>`. Every
/// operation serializes on the internal lock; the lock is never held
/// across an await point.
#[derive(Debug)]
pub struct EndpointRegistry {
    inner: Mutex<VecDeque<Endpoint>>,
}

impl EndpointRegistry {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            inner: Mutex::new(endpoints.into()),
        }
    }

    /// Take the endpoint at the front of rotation and move it to the back.
    ///
    /// Returns `None` once the registry is empty; it never repopulates.
    pub fn next(&self) -> Option<Endpoint> {
        let mut queue = self.lock();
        let endpoint = queue.pop_front()?;
        queue.push_back(endpoint.clone());
        Some(endpoint)
    }

    /// Permanently remove every occurrence of `endpoint` from rotation.
    ///
    /// Idempotent: excluding an endpoint that is not present is a no-op.
    pub fn exclude(&self, endpoint: &Endpoint) {
        self.lock().retain(|e| e != endpoint);
    }

    /// Number of endpoints still eligible for rotation.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Endpoint>> {
        // Registry operations cannot panic while holding the lock, but
        // recover from poisoning anyway rather than unwinding the server.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
