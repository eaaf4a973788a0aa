//! Isolation-helper configuration rendering
//!
//! The supervisor hands the helper a rendered config file describing the
//! container: hostname, virtual interface, rootfs pin, pseudo-filesystem
//! mounts and cgroup limits.

use crate::container::config::{ContainerConfig, NetworkSettings};
use std::fmt::Write;
use std::path::Path;

/// Render the helper config for one container
pub fn render_config(
    id: &str,
    rootfs: &Path,
    bridge_iface: &str,
    config: &ContainerConfig,
    settings: &NetworkSettings,
) -> String {
    let rootfs = rootfs.display();
    let hostname = if config.hostname.is_empty() {
        id
    } else {
        &config.hostname
    };

    let mut out = String::new();
    let _ = writeln!(out, "lxc.utsname = {}", hostname);
    let _ = writeln!(out);

    let _ = writeln!(out, "# network interface");
    let _ = writeln!(out, "lxc.network.type = veth");
    let _ = writeln!(out, "lxc.network.flags = up");
    let _ = writeln!(out, "lxc.network.link = {}", bridge_iface);
    let _ = writeln!(out, "lxc.network.name = eth0");
    let _ = writeln!(out, "lxc.network.mtu = 1500");
    if !settings.ip_address.is_empty() {
        let _ = writeln!(
            out,
            "lxc.network.ipv4 = {}/{}",
            settings.ip_address, settings.ip_prefix_len
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "# root filesystem");
    let _ = writeln!(out, "lxc.rootfs = {}", rootfs);
    let _ = writeln!(out);

    let _ = writeln!(out, "# pseudo filesystems");
    let _ = writeln!(
        out,
        "lxc.mount.entry = proc {}/proc proc nosuid,nodev,noexec 0 0",
        rootfs
    );
    let _ = writeln!(
        out,
        "lxc.mount.entry = sysfs {}/sys sysfs nosuid,nodev,noexec 0 0",
        rootfs
    );
    let _ = writeln!(
        out,
        "lxc.mount.entry = devpts {}/dev/pts devpts newinstance,ptmxmode=0666,nosuid,noexec 0 0",
        rootfs
    );
    let _ = writeln!(
        out,
        "lxc.mount.entry = shm {}/dev/shm tmpfs size=65536k,nosuid,nodev,noexec 0 0",
        rootfs
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "# dangerous capabilities");
    let _ = writeln!(out, "lxc.cap.drop = sys_module sys_rawio sys_time sys_admin");

    if config.memory > 0 {
        let _ = writeln!(out);
        let _ = writeln!(out, "# memory limits");
        let _ = writeln!(out, "lxc.cgroup.memory.limit_in_bytes = {}", config.memory);
        let _ = writeln!(
            out,
            "lxc.cgroup.memory.soft_limit_in_bytes = {}",
            config.memory
        );
        if config.memory_swap > 0 {
            let _ = writeln!(
                out,
                "lxc.cgroup.memory.memsw.limit_in_bytes = {}",
                config.memory_swap
            );
        }
    }

    out
}
