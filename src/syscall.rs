//! Raw system call bindings for Linux
//!
//! Thin wrappers over the libc calls the engine needs: filesystem mounts,
//! pseudo-terminal allocation and interface address discovery.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::net::Ipv4Addr;
use std::os::unix::io::FromRawFd;

/// Umount flags
pub mod umount_flags {
    /// Force unmount
    pub const MNT_FORCE: i32 = 1;
    /// Lazy unmount
    pub const MNT_DETACH: i32 = 2;
}

/// Result type for syscall operations
pub type SyscallResult<T> = std::result::Result<T, io::Error>;

fn cstring(s: &str, what: &str) -> SyscallResult<CString> {
    CString::new(s).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid {}", what)))
}

/// Mount a filesystem
pub fn mount(
    source: Option<&str>,
    target: &str,
    fstype: Option<&str>,
    flags: u64,
    data: Option<&str>,
) -> SyscallResult<()> {
    let source_cstr = source.map(|s| cstring(s, "source path")).transpose()?;
    let target_cstr = cstring(target, "target path")?;
    let fstype_cstr = fstype.map(|s| cstring(s, "fstype")).transpose()?;
    let data_cstr = data.map(|s| cstring(s, "data")).transpose()?;

    let source_ptr = source_cstr.as_ref().map(|s| s.as_ptr()).unwrap_or(std::ptr::null());
    let fstype_ptr = fstype_cstr.as_ref().map(|s| s.as_ptr()).unwrap_or(std::ptr::null());
    let data_ptr = data_cstr
        .as_ref()
        .map(|s| s.as_ptr() as *const libc::c_void)
        .unwrap_or(std::ptr::null());

    let result = unsafe { libc::mount(source_ptr, target_cstr.as_ptr(), fstype_ptr, flags, data_ptr) };

    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Unmount a filesystem
pub fn umount2(target: &str, flags: i32) -> SyscallResult<()> {
    let target_cstr = cstring(target, "target path")?;

    let result = unsafe { libc::umount2(target_cstr.as_ptr(), flags) };

    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Send a signal to a process
pub fn kill(pid: i32, signal: i32) -> SyscallResult<()> {
    let result = unsafe { libc::kill(pid, signal) };
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Allocate a pseudo-terminal pair, returning (master, slave)
pub fn openpty() -> SyscallResult<(File, File)> {
    let mut master: libc::c_int = -1;
    let mut slave: libc::c_int = -1;

    let result = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };

    if result < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: openpty returned two freshly opened descriptors we now own.
    let master = unsafe { File::from_raw_fd(master) };
    let slave = unsafe { File::from_raw_fd(slave) };
    Ok((master, slave))
}

/// Return the first IPv4 address and prefix length of a network interface
pub fn iface_ipv4_addr(name: &str) -> SyscallResult<(Ipv4Addr, u8)> {
    let mut addrs: *mut libc::ifaddrs = std::ptr::null_mut();

    if unsafe { libc::getifaddrs(&mut addrs) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut found = None;
    let mut cursor = addrs;
    while !cursor.is_null() {
        // SAFETY: cursor walks the list returned by getifaddrs until null.
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        if entry.ifa_addr.is_null() || entry.ifa_netmask.is_null() {
            continue;
        }
        let ifa_name = unsafe { std::ffi::CStr::from_ptr(entry.ifa_name) };
        if ifa_name.to_bytes() != name.as_bytes() {
            continue;
        }
        let family = unsafe { (*entry.ifa_addr).sa_family };
        if family != libc::AF_INET as libc::sa_family_t {
            continue;
        }
        let addr_in = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
        let mask_in = unsafe { &*(entry.ifa_netmask as *const libc::sockaddr_in) };
        let ip = Ipv4Addr::from(u32::from_be(addr_in.sin_addr.s_addr));
        let prefix = u32::from_be(mask_in.sin_addr.s_addr).count_ones() as u8;
        found = Some((ip, prefix));
        break;
    }

    unsafe { libc::freeifaddrs(addrs) };

    found.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("interface {} has no IPv4 address", name),
        )
    })
}
