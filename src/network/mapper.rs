//! Host-to-container port forwarding
//!
//! The mapper owns a private chain in the host's NAT table, hooked into
//! PREROUTING and OUTPUT. Each mapping is one DNAT rule forwarding
//! incoming TCP on a host port to a container endpoint.

use crate::error::{CaskError, Result};
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::process::Command;
use std::sync::Mutex;

/// Name of the NAT chain owned by the engine
pub const CHAIN: &str = "CASK";

const IPTABLES: &str = "/sbin/iptables";

/// Run iptables with the given arguments
fn iptables(args: &[&str]) -> Result<()> {
    let status = Command::new(IPTABLES)
        .args(args)
        .status()
        .map_err(|e| CaskError::PacketFilter(format!("iptables failed: {}", e)))?;
    if !status.success() {
        return Err(CaskError::PacketFilter(format!(
            "iptables failed: iptables {}",
            args.join(" ")
        )));
    }
    Ok(())
}

/// Port mapping table backed by NAT rules
#[derive(Debug, Default)]
pub struct PortMapper {
    mappings: Mutex<HashMap<u16, SocketAddrV4>>,
}

impl PortMapper {
    /// Create the mapper: tear down any leftover chain from a previous
    /// run, then recreate it and hook it into PREROUTING and OUTPUT.
    ///
    /// Setup failure leaves the mapper in place with a warning; rule
    /// installation reports errors at [`map`](Self::map) time.
    pub fn new() -> PortMapper {
        let mapper = PortMapper::default();
        mapper.cleanup();
        if let Err(e) = mapper.setup() {
            tracing::warn!("port forwarding degraded: {}", e);
        }
        mapper
    }

    /// Best-effort removal of the chain and its hooks. Errors are
    /// ignored: the chain may simply never have been set up.
    fn cleanup(&self) {
        let _ = iptables(&["-t", "nat", "-D", "PREROUTING", "-j", CHAIN]);
        let _ = iptables(&["-t", "nat", "-D", "OUTPUT", "-j", CHAIN]);
        let _ = iptables(&["-t", "nat", "-F", CHAIN]);
        let _ = iptables(&["-t", "nat", "-X", CHAIN]);
        if let Ok(mut mappings) = self.mappings.lock() {
            mappings.clear();
        }
    }

    fn setup(&self) -> Result<()> {
        iptables(&["-t", "nat", "-N", CHAIN]).map_err(|_| {
            CaskError::PacketFilter(format!(
                "Unable to setup port forwarding: failed to create {} chain",
                CHAIN
            ))
        })?;
        iptables(&["-t", "nat", "-A", "PREROUTING", "-j", CHAIN]).map_err(|_| {
            CaskError::PacketFilter(format!(
                "Unable to setup port forwarding: failed to hook {} into PREROUTING",
                CHAIN
            ))
        })?;
        iptables(&["-t", "nat", "-A", "OUTPUT", "-j", CHAIN]).map_err(|_| {
            CaskError::PacketFilter(format!(
                "Unable to setup port forwarding: failed to hook {} into OUTPUT",
                CHAIN
            ))
        })?;
        Ok(())
    }

    fn forward(&self, rule: &str, port: u16, dest: SocketAddrV4) -> Result<()> {
        iptables(&[
            "-t",
            "nat",
            rule,
            CHAIN,
            "-p",
            "tcp",
            "--dport",
            &port.to_string(),
            "-j",
            "DNAT",
            "--to-destination",
            &dest.to_string(),
        ])
    }

    /// Forward incoming TCP on a host port to a container endpoint.
    ///
    /// A failed rule installation leaves the mapping table unchanged.
    pub fn map(&self, port: u16, dest: SocketAddrV4) -> Result<()> {
        let mut mappings = self
            .mappings
            .lock()
            .map_err(|_| CaskError::Lock("Failed to acquire mapping lock".to_string()))?;
        if mappings.contains_key(&port) {
            return Err(CaskError::Network(format!(
                "Host port {} is already mapped",
                port
            )));
        }
        self.forward("-A", port, dest)?;
        mappings.insert(port, dest);
        Ok(())
    }

    /// Remove the forwarding rule and the mapping for a host port
    pub fn unmap(&self, port: u16) -> Result<()> {
        let mut mappings = self
            .mappings
            .lock()
            .map_err(|_| CaskError::Lock("Failed to acquire mapping lock".to_string()))?;
        let dest = *mappings
            .get(&port)
            .ok_or(CaskError::PortNotMapped(port))?;
        self.forward("-D", port, dest)?;
        mappings.remove(&port);
        Ok(())
    }

    /// Current destination of a host port, if mapped
    pub fn get(&self, port: u16) -> Option<SocketAddrV4> {
        self.mappings.lock().ok().and_then(|m| m.get(&port).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    // The tests below exercise the bookkeeping around the external
    // iptables boundary; installing real rules needs a privileged host.

    fn dest() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(172, 17, 0, 2), 80)
    }

    #[test]
    fn test_unmap_unknown_port() {
        let mapper = PortMapper::default();
        assert!(matches!(
            mapper.unmap(49153),
            Err(CaskError::PortNotMapped(49153))
        ));
    }

    #[test]
    fn test_failed_map_leaves_table_unchanged() {
        let mapper = PortMapper::default();
        if mapper.map(49153, dest()).is_err() {
            // Rule installation failed (unprivileged host); the table
            // must not record the mapping.
            assert!(mapper.get(49153).is_none());
            assert!(matches!(
                mapper.unmap(49153),
                Err(CaskError::PortNotMapped(_))
            ));
        } else {
            // Rule went in (privileged host); clean up after ourselves.
            assert_eq!(mapper.get(49153), Some(dest()));
            mapper.unmap(49153).unwrap();
            assert!(mapper.get(49153).is_none());
        }
    }

    #[test]
    fn test_double_map_conflicts() {
        let mapper = PortMapper::default();
        // Seed the table directly so the check runs without iptables.
        mapper.mappings.lock().unwrap().insert(49153, dest());
        assert!(matches!(
            mapper.map(49153, dest()),
            Err(CaskError::Network(_))
        ));
    }
}
