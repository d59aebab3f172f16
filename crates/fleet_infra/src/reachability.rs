//! Post-create reachability verification: did the instance actually come
//! up enough to be handed to the caller. Pluggable so tests never touch a
//! real socket.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use fleet_core::session::ReachabilityHandle;

#[async_trait]
pub trait ReachabilityVerifier: Send + Sync {
    async fn verify(&self, handle: &ReachabilityHandle, deadline: Duration) -> bool;
}

/// Connects to `host:port` and treats a successful TCP handshake as
/// reachable. Does not attempt to authenticate or run a command — that is
/// the on-node agent's job, out of scope here.
#[derive(Debug, Default)]
pub struct TcpReachabilityVerifier;

#[async_trait]
impl ReachabilityVerifier for TcpReachabilityVerifier {
    async fn verify(&self, handle: &ReachabilityHandle, deadline: Duration) -> bool {
        let addr = format!("{}:{}", handle.host, handle.port);
        matches!(
            timeout(deadline, TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        )
    }
}

/// Always succeeds (or always fails, if constructed with `false`) without
/// touching the network. Used by the provisioner's test suite.
#[derive(Debug, Clone, Copy)]
pub struct StubReachabilityVerifier(pub bool);

#[async_trait]
impl ReachabilityVerifier for StubReachabilityVerifier {
    async fn verify(&self, _handle: &ReachabilityHandle, _deadline: Duration) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_reports_exactly_what_it_was_built_with() {
        let handle = ReachabilityHandle {
            host: "127.0.0.1".to_string(),
            port: 22,
            user: "root".to_string(),
            api_endpoint: None,
        };
        assert!(StubReachabilityVerifier(true).verify(&handle, Duration::from_secs(1)).await);
        assert!(!StubReachabilityVerifier(false).verify(&handle, Duration::from_secs(1)).await);
    }
}
