//! Network manager
//!
//! Composes the address and port pools with the port mapper, and hands
//! out per-container interface handles. An interface handle exclusively
//! owns its IP and the host ports mapped to it; releasing the handle
//! returns everything to the pools.

use crate::error::{CaskError, Result};
use crate::network::allocator::{IpAllocator, Ipv4Network, PortAllocator};
use crate::network::mapper::PortMapper;
use crate::syscall;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

#[derive(Debug)]
struct Inner {
    bridge_iface: String,
    network: Ipv4Network,
    ips: IpAllocator,
    ports: PortAllocator,
    mapper: PortMapper,
}

/// Manages the networking of every container on this host.
///
/// One manager per host machine; clones share the pools.
#[derive(Debug, Clone)]
pub struct NetworkManager {
    inner: Arc<Inner>,
}

impl NetworkManager {
    /// Create a manager on a bridge interface, reading the bridge's
    /// address to derive the container network.
    pub fn new(bridge_iface: &str, port_range: (u16, u16)) -> Result<NetworkManager> {
        let (address, prefix) = syscall::iface_ipv4_addr(bridge_iface)
            .map_err(|e| CaskError::Network(format!("Bridge {}: {}", bridge_iface, e)))?;
        Self::with_network(bridge_iface, Ipv4Network::new(address, prefix), port_range)
    }

    /// Create a manager for an explicitly given bridge network
    pub fn with_network(
        bridge_iface: &str,
        network: Ipv4Network,
        port_range: (u16, u16),
    ) -> Result<NetworkManager> {
        let ips = IpAllocator::new(network)?;
        let ports = PortAllocator::new(port_range.0, port_range.1);
        let mapper = PortMapper::new();
        Ok(NetworkManager {
            inner: Arc::new(Inner {
                bridge_iface: bridge_iface.to_string(),
                network,
                ips,
                ports,
                mapper,
            }),
        })
    }

    /// The bridge interface name
    pub fn bridge_iface(&self) -> &str {
        &self.inner.bridge_iface
    }

    /// The bridge network containers are addressed in
    pub fn network(&self) -> Ipv4Network {
        self.inner.network
    }

    /// Allocate an interface handle for one container
    pub fn allocate(&self) -> Result<NetworkInterface> {
        let ip = self.inner.ips.acquire()?;
        Ok(NetworkInterface {
            ip,
            prefix: self.inner.network.prefix,
            gateway: self.inner.network.address,
            manager: self.inner.clone(),
            ext_ports: Vec::new(),
            released: false,
        })
    }

    #[cfg(test)]
    fn available_ips(&self) -> usize {
        self.inner.ips.available()
    }

    #[cfg(test)]
    fn available_ports(&self) -> usize {
        self.inner.ports.available()
    }
}

/// The networking stack of one container
#[derive(Debug)]
pub struct NetworkInterface {
    ip: Ipv4Addr,
    prefix: u8,
    gateway: Ipv4Addr,
    manager: Arc<Inner>,
    ext_ports: Vec<u16>,
    released: bool,
}

impl NetworkInterface {
    /// The container's assigned address
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// Prefix length of the container network
    pub fn prefix_len(&self) -> u8 {
        self.prefix
    }

    /// Gateway address (the bridge)
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Host ports currently mapped to this interface
    pub fn ext_ports(&self) -> &[u16] {
        &self.ext_ports
    }

    /// Allocate a host port and forward it to `container_port` on this
    /// interface. A failed forwarding rule returns the host port to the
    /// pool.
    pub fn allocate_port(&mut self, container_port: u16) -> Result<u16> {
        if self.released {
            return Err(CaskError::Network(
                "Interface has already been released".to_string(),
            ));
        }
        let ext_port = self.manager.ports.acquire()?;
        if let Err(e) = self
            .manager
            .mapper
            .map(ext_port, SocketAddrV4::new(self.ip, container_port))
        {
            let _ = self.manager.ports.release(ext_port);
            return Err(e);
        }
        self.ext_ports.push(ext_port);
        Ok(ext_port)
    }

    /// Release every resource owned by this interface: unmap and return
    /// each host port (logging but continuing on individual failures),
    /// then return the IP. Must be called exactly once.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Err(CaskError::Network(
                "Interface has already been released".to_string(),
            ));
        }
        self.released = true;
        for port in self.ext_ports.drain(..) {
            if let Err(e) = self.manager.mapper.unmap(port) {
                tracing::warn!("Unable to unmap port {}: {}", port, e);
            }
            if let Err(e) = self.manager.ports.release(port) {
                tracing::warn!("Unable to release port {}: {}", port, e);
            }
        }
        self.manager.ips.release(self.ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager() -> NetworkManager {
        let network = Ipv4Network::new(Ipv4Addr::new(172, 30, 0, 1), 24);
        NetworkManager::with_network("testbr0", network, (49153, 49156)).unwrap()
    }

    #[test]
    fn test_allocate_populates_handle() {
        let manager = test_manager();
        let iface = manager.allocate().unwrap();
        assert_eq!(iface.gateway(), Ipv4Addr::new(172, 30, 0, 1));
        assert_eq!(iface.prefix_len(), 24);
        assert_ne!(iface.ip(), iface.gateway());
        assert!(iface.ext_ports().is_empty());
    }

    #[test]
    fn test_release_returns_ip() {
        let manager = test_manager();
        let before = manager.available_ips();
        let mut iface = manager.allocate().unwrap();
        assert_eq!(manager.available_ips(), before - 1);
        iface.release().unwrap();
        assert_eq!(manager.available_ips(), before);
    }

    #[test]
    fn test_double_release_is_an_error() {
        let manager = test_manager();
        let mut iface = manager.allocate().unwrap();
        iface.release().unwrap();
        assert!(iface.release().is_err());
    }

    #[test]
    fn test_failed_port_mapping_rolls_back() {
        let manager = test_manager();
        let mut iface = manager.allocate().unwrap();
        let before = manager.available_ports();
        match iface.allocate_port(80) {
            Err(_) => {
                // No packet filter on this host: the acquired port must
                // be back in the pool and unrecorded on the handle.
                assert_eq!(manager.available_ports(), before);
                assert!(iface.ext_ports().is_empty());
            }
            Ok(ext) => {
                assert_eq!(manager.available_ports(), before - 1);
                assert_eq!(iface.ext_ports(), &[ext]);
            }
        }
        let _ = iface.release();
    }

    #[test]
    fn test_ip_uniqueness_across_handles() {
        let manager = test_manager();
        let a = manager.allocate().unwrap();
        let b = manager.allocate().unwrap();
        assert_ne!(a.ip(), b.ip());
    }
}
