//! Bounded resource pools for container networking
//!
//! IP addresses and host ports come out of fixed-size pools. Acquire is
//! non-blocking: an empty pool is a normal failure, not a wait. Release
//! returns the element, and over-filling a pool is an error.

use crate::error::{CaskError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::Mutex;

/// An IPv4 network given as address + prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Network {
    /// Interface address within the network (the gateway)
    pub address: Ipv4Addr,
    /// Prefix length
    pub prefix: u8,
}

impl Ipv4Network {
    /// Create a network description
    pub fn new(address: Ipv4Addr, prefix: u8) -> Self {
        Self { address, prefix }
    }

    /// Netmask as a 32-bit value
    pub fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix)
        }
    }

    /// First address in the network (the network address)
    pub fn network_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & self.mask())
    }

    /// Last address in the network (the broadcast address)
    pub fn broadcast_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) | !self.mask())
    }

    /// Number of addresses in the network, including network and
    /// broadcast
    pub fn size(&self) -> u32 {
        (!self.mask()).wrapping_add(1)
    }
}

impl std::fmt::Display for Ipv4Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

/// Pool of host-unique IPv4 addresses within a bridge network
#[derive(Debug)]
pub struct IpAllocator {
    queue: Mutex<VecDeque<Ipv4Addr>>,
    capacity: usize,
}

impl IpAllocator {
    /// Populate the pool with every address of the network except the
    /// network address, the broadcast address and the gateway (the
    /// bridge's own address).
    pub fn new(network: Ipv4Network) -> Result<IpAllocator> {
        if network.size() < 4 {
            return Err(CaskError::Network(format!(
                "Network {} is too small to allocate from",
                network
            )));
        }
        let first = u32::from(network.network_address());
        let mut queue = VecDeque::new();
        for offset in 1..network.size() - 1 {
            let ip = Ipv4Addr::from(first + offset);
            if ip == network.address {
                continue;
            }
            queue.push_back(ip);
        }
        let capacity = queue.len();
        Ok(IpAllocator {
            queue: Mutex::new(queue),
            capacity,
        })
    }

    /// Take an address from the pool
    pub fn acquire(&self) -> Result<Ipv4Addr> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| CaskError::Lock("Failed to acquire ip pool lock".to_string()))?;
        queue
            .pop_front()
            .ok_or_else(|| CaskError::PoolExhausted("No more IP addresses available".to_string()))
    }

    /// Return an address to the pool
    pub fn release(&self, ip: Ipv4Addr) -> Result<()> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| CaskError::Lock("Failed to acquire ip pool lock".to_string()))?;
        if queue.len() >= self.capacity {
            return Err(CaskError::PoolOverflow(
                "Too many IP addresses have been released".to_string(),
            ));
        }
        queue.push_back(ip);
        Ok(())
    }

    /// Number of addresses currently available
    pub fn available(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

/// Pool of host ports in a configured range
#[derive(Debug)]
pub struct PortAllocator {
    ports: Mutex<VecDeque<u16>>,
    capacity: usize,
}

impl PortAllocator {
    /// Populate the pool with every port in `[start, end)`
    pub fn new(start: u16, end: u16) -> PortAllocator {
        let ports: VecDeque<u16> = (start..end).collect();
        let capacity = ports.len();
        PortAllocator {
            ports: Mutex::new(ports),
            capacity,
        }
    }

    /// Take a port from the pool
    pub fn acquire(&self) -> Result<u16> {
        let mut ports = self
            .ports
            .lock()
            .map_err(|_| CaskError::Lock("Failed to acquire port pool lock".to_string()))?;
        ports
            .pop_front()
            .ok_or_else(|| CaskError::PoolExhausted("No more ports available".to_string()))
    }

    /// Return a port to the pool
    pub fn release(&self, port: u16) -> Result<()> {
        let mut ports = self
            .ports
            .lock()
            .map_err(|_| CaskError::Lock("Failed to acquire port pool lock".to_string()))?;
        if ports.len() >= self.capacity {
            return Err(CaskError::PoolOverflow(
                "Too many ports have been released".to_string(),
            ));
        }
        ports.push_back(port);
        Ok(())
    }

    /// Number of ports currently available
    pub fn available(&self) -> usize {
        self.ports.lock().map(|p| p.len()).unwrap_or(0)
    }
}
