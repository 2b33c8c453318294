//! Ephemeral TCP port allocation.
//!
//! Ports are observed by binding a transient probe socket that is released
//! immediately, the same trick the integration harness uses to pick a bind
//! port before launching a server. The allocator remembers every port it has
//! handed out so rapid re-allocation within one process never yields a
//! duplicate, even when the OS would happily reuse the port.

use std::{
    collections::HashSet,
    io,
    net::{IpAddr, Ipv4Addr, TcpListener, ToSocketAddrs},
};

use tracing::debug;

/// Upper bound on probe attempts before giving up on a fresh port.
const MAX_ATTEMPTS: usize = 64;

/// Hands out ephemeral, collision-free TCP ports on one address.
///
/// One allocator is scoped to one configuration-pipeline application so its
/// duplicate tracking stays meaningful; it does not guard against races with
/// unrelated processes.
#[derive(Debug)]
pub struct PortAllocator {
    address: IpAddr,
    allocated: HashSet<u16>,
}

impl PortAllocator {
    /// Creates an allocator probing on `address`.
    #[must_use]
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            allocated: HashSet::new(),
        }
    }

    /// Creates an allocator on the local host.
    ///
    /// Resolution failure for the symbolic `localhost` name silently falls
    /// back to the loopback address rather than failing the caller.
    #[must_use]
    pub fn localhost() -> Self { Self::new(resolve_localhost()) }

    /// Returns the address this allocator probes on.
    #[must_use]
    pub const fn address(&self) -> IpAddr { self.address }

    /// Allocates a fresh ephemeral port, never repeating a prior result.
    ///
    /// # Errors
    ///
    /// Returns an error when the probe socket cannot be bound, or when the OS
    /// keeps returning already-seen ports for the whole retry budget.
    pub fn next(&mut self) -> io::Result<u16> {
        for _ in 0..MAX_ATTEMPTS {
            let socket = TcpListener::bind((self.address, 0))?;
            let port = socket.local_addr()?.port();
            drop(socket);
            if self.allocated.insert(port) {
                debug!(port, address = %self.address, "allocated ephemeral port");
                return Ok(port);
            }
        }
        Err(io::Error::other(format!(
            "no fresh ephemeral port on {} after {MAX_ATTEMPTS} attempts",
            self.address
        )))
    }
}

/// Resolves `localhost`, falling back to the IPv4 loopback address.
fn resolve_localhost() -> IpAddr {
    ("localhost", 0_u16)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::PortAllocator;

    #[test]
    fn never_repeats_its_own_results() {
        let mut allocator = PortAllocator::localhost();
        let mut seen = HashSet::new();
        for _ in 0..16 {
            let port = allocator.next().unwrap();
            assert!(port > 0);
            assert!(seen.insert(port), "port {port} was handed out twice");
        }
    }

    #[test]
    fn localhost_resolves_to_a_loopback_address() {
        let allocator = PortAllocator::localhost();
        assert!(allocator.address().is_loopback());
    }
}
