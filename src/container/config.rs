//! Container configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration a container is created with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Hostname inside the container
    pub hostname: String,
    /// User to run the command as (name or uid), empty for root
    pub user: String,
    /// Memory limit in bytes, 0 for unlimited
    pub memory: i64,
    /// Total memory + swap limit in bytes, -1 to disable swap accounting
    pub memory_swap: i64,
    /// Container ports to expose on the host
    pub ports: Vec<u16>,
    /// Attach standard streams to a tty
    pub tty: bool,
    /// Keep stdin open
    pub open_stdin: bool,
    /// Environment variables, as KEY=value
    pub env: Vec<String>,
    /// Command and arguments
    pub cmd: Vec<String>,
    /// Image name as given by the operator (may be symbolic)
    pub image: String,
}

impl ContainerConfig {
    /// Create a config for an image and command
    pub fn new(image: &str, cmd: Vec<String>) -> Self {
        Self {
            image: image.to_string(),
            cmd,
            ..Default::default()
        }
    }

    /// Set the hostname
    pub fn hostname(mut self, hostname: &str) -> Self {
        self.hostname = hostname.to_string();
        self
    }

    /// Set the user
    pub fn user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    /// Set the memory limit in bytes
    pub fn memory(mut self, memory: i64) -> Self {
        self.memory = memory;
        self
    }

    /// Expose a container port
    pub fn port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{}={}", key, value));
        self
    }

    /// Attach streams to a tty
    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Keep stdin open
    pub fn open_stdin(mut self, open: bool) -> Self {
        self.open_stdin = open;
        self
    }
}

/// Network state of a running container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Assigned IPv4 address
    pub ip_address: String,
    /// Prefix length of the container network
    pub ip_prefix_len: u8,
    /// Gateway address
    pub gateway: String,
    /// Container port → host port
    pub port_mapping: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ContainerConfig::new("base", vec!["/bin/sh".to_string(), "-c".to_string()])
            .hostname("box")
            .user("1000")
            .memory(64 * 1024 * 1024)
            .port(80)
            .port(443)
            .env("TERM", "xterm")
            .tty(true)
            .open_stdin(true);

        assert_eq!(config.image, "base");
        assert_eq!(config.cmd, vec!["/bin/sh", "-c"]);
        assert_eq!(config.ports, vec![80, 443]);
        assert_eq!(config.env, vec!["TERM=xterm"]);
        assert!(config.tty && config.open_stdin);
    }

    #[test]
    fn test_round_trip() {
        let config = ContainerConfig::new("base", vec!["/bin/true".to_string()]).port(8080);
        let json = serde_json::to_string(&config).unwrap();
        let back: ContainerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
