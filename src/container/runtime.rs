//! Container records and the supervisor
//!
//! A container is a persistent record (config, resolved image, network
//! settings, state) plus the live machinery around one supervised
//! process: the layered rootfs mount, an interface handle, the isolation
//! helper child and the IO plumbing. The public attributes round-trip
//! through `config.json`; the live machinery is rebuilt at registration.

use crate::archive::{self, Archive};
use crate::container::config::{ContainerConfig, NetworkSettings};
use crate::container::lxc;
use crate::container::state::{State, StateData};
use crate::error::{CaskError, Result};
use crate::image::{Change, ImageNode};
use crate::mount;
use crate::network::NetworkInterface;
use crate::runtime::Runtime;
use crate::stdio::{pipe, Broadcaster, PipeReader, PipeWriter};
use crate::syscall;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// The isolation helper the supervisor spawns
pub const HELPER_PATH: &str = "/usr/bin/lxc-start";

/// The helper's own signalling control
const HELPER_KILL_PATH: &str = "/usr/bin/lxc-kill";

/// The in-container init the helper execs
const INIT_PATH: &str = "/sbin/init";

/// Grace period between the terminate signal and the unconditional kill
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

fn lock_err<T>(_: T) -> CaskError {
    CaskError::Lock("Failed to acquire container lock".to_string())
}

/// Persisted form of a container
#[derive(Debug, Serialize, Deserialize)]
struct ContainerRecord {
    id: String,
    created: DateTime<Utc>,
    path: String,
    args: Vec<String>,
    config: ContainerConfig,
    state: StateData,
    image: String,
    network_settings: NetworkSettings,
}

/// A container: persistent record plus live supervision state
pub struct Container {
    root: PathBuf,
    /// Container id
    pub id: String,
    /// Creation timestamp
    pub created: DateTime<Utc>,
    /// Command path
    pub path: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Full creation config
    pub config: ContainerConfig,
    /// Resolved image id
    pub image: String,
    /// State machine
    pub state: State,

    settings: Mutex<NetworkSettings>,
    network: Mutex<Option<NetworkInterface>>,
    stdout: Broadcaster,
    stderr: Broadcaster,
    stdin: Mutex<Option<PipeReader>>,
    stdin_pipe: Mutex<Option<PipeWriter>>,
    io_threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
    runtime: Mutex<Weak<Runtime>>,
    self_ref: Mutex<Weak<Container>>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("image", &self.image)
            .field("state", &self.state.snapshot())
            .finish()
    }
}

impl Container {
    /// Build a fresh container record rooted at `root`
    pub(crate) fn new(root: PathBuf, id: String, config: ContainerConfig, image: String) -> Container {
        let path = config.cmd.first().cloned().unwrap_or_default();
        let args = config.cmd.iter().skip(1).cloned().collect();
        Container {
            root,
            id,
            created: Utc::now(),
            path,
            args,
            config,
            image,
            state: State::default(),
            settings: Mutex::new(NetworkSettings::default()),
            network: Mutex::new(None),
            stdout: Broadcaster::new(),
            stderr: Broadcaster::new(),
            stdin: Mutex::new(None),
            stdin_pipe: Mutex::new(None),
            io_threads: Mutex::new(Vec::new()),
            runtime: Mutex::new(Weak::new()),
            self_ref: Mutex::new(Weak::new()),
        }
    }

    /// Load a container record from its directory
    pub(crate) fn from_disk(root: PathBuf) -> Result<Container> {
        let data = std::fs::read(root.join("config.json"))?;
        let record: ContainerRecord = serde_json::from_slice(&data)?;
        Ok(Container {
            root,
            id: record.id,
            created: record.created,
            path: record.path,
            args: record.args,
            config: record.config,
            image: record.image,
            state: State::from_data(record.state),
            settings: Mutex::new(record.network_settings),
            network: Mutex::new(None),
            stdout: Broadcaster::new(),
            stderr: Broadcaster::new(),
            stdin: Mutex::new(None),
            stdin_pipe: Mutex::new(None),
            io_threads: Mutex::new(Vec::new()),
            runtime: Mutex::new(Weak::new()),
            self_ref: Mutex::new(Weak::new()),
        })
    }

    /// Persist the record to `config.json`
    pub fn to_disk(&self) -> Result<()> {
        let record = ContainerRecord {
            id: self.id.clone(),
            created: self.created,
            path: self.path.clone(),
            args: self.args.clone(),
            config: self.config.clone(),
            state: self.state.snapshot(),
            image: self.image.clone(),
            network_settings: self.settings.lock().map_err(lock_err)?.clone(),
        };
        let data = serde_json::to_vec(&record)?;
        std::fs::write(self.json_path(), data)?;
        Ok(())
    }

    /// Container directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Metadata blob path
    pub fn json_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Rendered helper config path
    pub fn lxc_config_path(&self) -> PathBuf {
        self.root.join("config.lxc")
    }

    /// Layered rootfs mount point
    pub fn rootfs_path(&self) -> PathBuf {
        self.root.join("rootfs")
    }

    /// Private read-write layer
    pub fn rw_path(&self) -> PathBuf {
        self.root.join("rw")
    }

    /// Log file for a stream name
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}-{}.log", self.id, name))
    }

    /// Current network settings snapshot
    pub fn network_settings(&self) -> NetworkSettings {
        self.settings.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub(crate) fn set_runtime(&self, runtime: &Arc<Runtime>) {
        if let Ok(mut slot) = self.runtime.lock() {
            *slot = Arc::downgrade(runtime);
        }
    }

    pub(crate) fn set_self_ref(&self, me: &Arc<Container>) {
        if let Ok(mut slot) = self.self_ref.lock() {
            *slot = Arc::downgrade(me);
        }
    }

    fn self_arc(&self) -> Result<Arc<Container>> {
        self.self_ref
            .lock()
            .map_err(lock_err)?
            .upgrade()
            .ok_or_else(|| CaskError::Container("Container is not registered".to_string()))
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.runtime
            .lock()
            .map(|r| r.upgrade().is_some())
            .unwrap_or(false)
    }

    fn runtime(&self) -> Result<Arc<Runtime>> {
        self.runtime
            .lock()
            .map_err(lock_err)?
            .upgrade()
            .ok_or_else(|| CaskError::Container("Container is not registered".to_string()))
    }

    /// Resolve this container's image in the runtime's graph
    pub fn get_image(&self) -> Result<ImageNode> {
        self.runtime()?.graph().get(&self.image)
    }

    /// Whether the rootfs is currently mounted
    pub fn mounted(&self) -> Result<bool> {
        mount::is_mount_point(&self.rootfs_path())
    }

    /// Mount the image's layer stack at the rootfs
    pub fn mount(&self) -> Result<()> {
        let image = self.get_image()?;
        image.mount(&self.rootfs_path(), &self.rw_path())
    }

    /// Mount the rootfs unless it already is
    pub fn ensure_mounted(&self) -> Result<()> {
        if self.mounted()? {
            return Ok(());
        }
        self.mount()
    }

    /// Unmount the rootfs
    pub fn unmount(&self) -> Result<()> {
        mount::unmount(&self.rootfs_path())
    }

    /// The changeset of the read-write layer against the image
    pub fn changes(&self) -> Result<Vec<Change>> {
        let image = self.get_image()?;
        image.changes(&self.rw_path())
    }

    fn allocate_network(&self) -> Result<()> {
        let runtime = self.runtime()?;
        let mut iface = runtime.network_manager().allocate()?;
        let mut mapping = HashMap::new();
        for port in &self.config.ports {
            match iface.allocate_port(*port) {
                Ok(ext_port) => {
                    mapping.insert(port.to_string(), ext_port.to_string());
                }
                Err(e) => {
                    let _ = iface.release();
                    return Err(e);
                }
            }
        }
        {
            let mut settings = self.settings.lock().map_err(lock_err)?;
            settings.ip_address = iface.ip().to_string();
            settings.ip_prefix_len = iface.prefix_len();
            settings.gateway = iface.gateway().to_string();
            settings.port_mapping = mapping;
        }
        *self.network.lock().map_err(lock_err)? = Some(iface);
        Ok(())
    }

    fn release_network(&self) -> Result<()> {
        let iface = self.network.lock().map_err(lock_err)?.take();
        *self.settings.lock().map_err(lock_err)? = NetworkSettings::default();
        if let Some(mut iface) = iface {
            iface.release()?;
        }
        Ok(())
    }

    fn generate_lxc_config(&self) -> Result<()> {
        let runtime = self.runtime()?;
        let settings = self.settings.lock().map_err(lock_err)?.clone();
        let rendered = lxc::render_config(
            &self.id,
            &self.rootfs_path(),
            runtime.network_manager().bridge_iface(),
            &self.config,
            &settings,
        );
        std::fs::write(self.lxc_config_path(), rendered)?;
        Ok(())
    }

    /// Start the container.
    ///
    /// Mounts the rootfs, allocates networking, renders the helper
    /// config, spawns the isolation helper with its IO wired into the
    /// broadcasters, records the pid and hands the child to a background
    /// monitor.
    pub fn start(&self) -> Result<()> {
        if self.state.is_running() {
            return Err(CaskError::Container(format!(
                "Container {} is already running",
                self.id
            )));
        }
        let monitor_handle = self.self_arc()?;
        self.ensure_mounted()?;
        self.allocate_network()?;
        self.generate_lxc_config()?;

        let gateway = self.settings.lock().map_err(lock_err)?.gateway.clone();
        let mut params: Vec<String> = vec![
            "-n".to_string(),
            self.id.clone(),
            "-f".to_string(),
            self.lxc_config_path().display().to_string(),
            "--".to_string(),
            INIT_PATH.to_string(),
            "-g".to_string(),
            gateway,
        ];
        if !self.config.user.is_empty() {
            params.push("-u".to_string());
            params.push(self.config.user.clone());
        }
        params.push("--".to_string());
        params.push(self.path.clone());
        params.extend(self.args.iter().cloned());

        let mut cmd = Command::new(HELPER_PATH);
        cmd.args(&params);
        cmd.env_clear();
        cmd.env("HOME", "/");
        cmd.env("PATH", DEFAULT_PATH);
        for entry in &self.config.env {
            if let Some((key, value)) = entry.split_once('=') {
                cmd.env(key, value);
            }
        }

        let child = if self.config.tty {
            self.spawn_pty(cmd)
        } else {
            self.spawn_piped(cmd)
        }?;

        self.state.set_running(child.id() as i32)?;
        if let Err(e) = self.to_disk() {
            tracing::warn!("{}: Failed to persist record: {}", self.id, e);
        }
        std::thread::spawn(move || monitor_handle.monitor(child));
        Ok(())
    }

    /// Spawn with three pseudo-tty pairs, masters wired to the sinks
    fn spawn_pty(&self, mut cmd: Command) -> Result<Child> {
        let spawn_err =
            |e: std::io::Error| CaskError::Container(format!("Failed to allocate tty: {}", e));

        let (mut stdout_master, stdout_slave) = syscall::openpty().map_err(spawn_err)?;
        cmd.stdout(Stdio::from(stdout_slave));
        let (mut stderr_master, stderr_slave) = syscall::openpty().map_err(spawn_err)?;
        cmd.stderr(Stdio::from(stderr_slave));

        let mut stdout = self.stdout.clone();
        let stdout_thread = std::thread::spawn(move || {
            let _ = std::io::copy(&mut stdout_master, &mut stdout);
        });
        let mut stderr = self.stderr.clone();
        let stderr_thread = std::thread::spawn(move || {
            let _ = std::io::copy(&mut stderr_master, &mut stderr);
        });
        let mut io_threads = self.io_threads.lock().map_err(lock_err)?;
        io_threads.push(stdout_thread);
        io_threads.push(stderr_thread);
        drop(io_threads);

        if self.config.open_stdin {
            let (mut stdin_master, stdin_slave) = syscall::openpty().map_err(spawn_err)?;
            cmd.stdin(Stdio::from(stdin_slave));
            if let Some(mut reader) = self.stdin.lock().map_err(lock_err)?.take() {
                std::thread::spawn(move || {
                    let _ = std::io::copy(&mut reader, &mut stdin_master);
                });
            }
        } else {
            cmd.stdin(Stdio::null());
        }

        cmd.spawn()
            .map_err(|e| CaskError::Container(format!("Failed to spawn isolation helper: {}", e)))
    }

    /// Spawn with plain pipes into the sinks
    fn spawn_piped(&self, mut cmd: Command) -> Result<Child> {
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if self.config.open_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        let mut child = cmd
            .spawn()
            .map_err(|e| CaskError::Container(format!("Failed to spawn isolation helper: {}", e)))?;

        let mut io_threads = self.io_threads.lock().map_err(lock_err)?;
        if let Some(mut child_out) = child.stdout.take() {
            let mut stdout = self.stdout.clone();
            io_threads.push(std::thread::spawn(move || {
                let _ = std::io::copy(&mut child_out, &mut stdout);
            }));
        }
        if let Some(mut child_err) = child.stderr.take() {
            let mut stderr = self.stderr.clone();
            io_threads.push(std::thread::spawn(move || {
                let _ = std::io::copy(&mut child_err, &mut stderr);
            }));
        }
        drop(io_threads);
        if self.config.open_stdin {
            if let (Some(mut child_in), Some(mut reader)) = (
                child.stdin.take(),
                self.stdin.lock().map_err(lock_err)?.take(),
            ) {
                std::thread::spawn(move || {
                    let _ = std::io::copy(&mut reader, &mut child_in);
                });
            }
        }
        Ok(child)
    }

    /// Runs concurrently with the container: reap the helper, then tear
    /// down in fixed order. Cleanup failures are logged and swallowed so
    /// the transition to stopped always completes.
    fn monitor(self: Arc<Self>, mut child: Child) {
        let exit_code = match child.wait() {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                tracing::warn!("{}: Failed to wait for isolation helper: {}", self.id, e);
                -1
            }
        };

        if let Err(e) = self.release_network() {
            tracing::warn!("{}: Failed to release network: {}", self.id, e);
        }

        // Drain the copy threads so no tail output is lost, then close.
        let handles = self
            .io_threads
            .lock()
            .map(|mut t| t.drain(..).collect::<Vec<_>>())
            .unwrap_or_default();
        for handle in handles {
            let _ = handle.join();
        }
        self.stdout.close();
        self.stderr.close();
        if let Err(e) = self.unmount() {
            tracing::warn!("{}: Failed to unmount filesystem: {}", self.id, e);
        }

        // Hand a restart a fresh stdin pair instead of the drained one.
        if self.config.open_stdin {
            let (reader, writer) = pipe();
            if let Ok(mut stdin) = self.stdin.lock() {
                *stdin = Some(reader);
            }
            if let Ok(mut stdin_pipe) = self.stdin_pipe.lock() {
                *stdin_pipe = Some(writer);
            }
        }

        let _ = self.state.set_stopped(exit_code);
        if let Err(e) = self.to_disk() {
            tracing::warn!("{}: Failed to persist record: {}", self.id, e);
        }
    }

    /// Stop the container: terminate through the helper's control,
    /// escalating to [`kill`](Self::kill) when the signal fails or the
    /// grace period runs out. No-op when not running.
    pub fn stop(&self) -> Result<()> {
        if !self.state.is_running() {
            return Ok(());
        }

        // 1. Send the terminate signal.
        let terminated = Command::new(HELPER_KILL_PATH)
            .args(["-n", &self.id, "15"])
            .output();
        match terminated {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                tracing::warn!("{}", String::from_utf8_lossy(&output.stderr));
                tracing::warn!("Failed to send SIGTERM to the process, force killing");
                self.kill()?;
            }
            Err(e) => {
                tracing::warn!("Failed to run {}: {}", HELPER_KILL_PATH, e);
                self.kill()?;
            }
        }

        // 2. Wait for the process to exit on its own.
        match self.wait_timeout(STOP_TIMEOUT) {
            Ok(_) => Ok(()),
            Err(CaskError::Timeout(_)) => {
                tracing::warn!(
                    "Container {} failed to exit within 10 seconds of SIGTERM - using the force",
                    self.id
                );
                self.kill()
            }
            Err(e) => Err(e),
        }
    }

    /// Send the unconditional kill to the helper process and wait for
    /// the monitor to reap it. No-op when not running.
    pub fn kill(&self) -> Result<()> {
        if !self.state.is_running() {
            return Ok(());
        }
        let pid = self.state.pid();
        if pid > 0 {
            syscall::kill(pid, libc::SIGKILL)
                .map_err(|e| CaskError::Container(format!("Failed to kill container {}: {}", self.id, e)))?;
        }
        self.wait()?;
        Ok(())
    }

    /// Stop, then start again
    pub fn restart(&self) -> Result<()> {
        self.stop()?;
        self.start()
    }

    /// Block until the container stops running, then return its exit
    /// code
    pub fn wait(&self) -> Result<i32> {
        self.state.wait()
    }

    /// Like [`wait`](Self::wait), but give up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Result<i32> {
        self.state.wait_timeout(timeout)
    }

    /// Start and wait for exit, returning the exit code
    pub fn run(&self) -> Result<i32> {
        self.start()?;
        self.wait()
    }

    /// Start, drain stdout to EOF, wait for exit, return the output
    pub fn output(&self) -> Result<Vec<u8>> {
        let mut reader = self.stdout_pipe()?;
        self.start()?;
        let mut output = Vec::new();
        reader.read_to_end(&mut output)?;
        self.wait()?;
        Ok(output)
    }

    /// Attach a reader to the container's stdout
    pub fn stdout_pipe(&self) -> Result<PipeReader> {
        let (reader, writer) = pipe();
        self.stdout.add_writer(Box::new(writer));
        Ok(reader)
    }

    /// Attach a reader to the container's stderr
    pub fn stderr_pipe(&self) -> Result<PipeReader> {
        let (reader, writer) = pipe();
        self.stderr.add_writer(Box::new(writer));
        Ok(reader)
    }

    /// Take the write half of the container's stdin.
    ///
    /// `None` when stdin is closed by config or the half was already
    /// taken; a fresh pair is wired after every exit.
    pub fn stdin_pipe(&self) -> Result<Option<PipeWriter>> {
        Ok(self.stdin_pipe.lock().map_err(lock_err)?.take())
    }

    pub(crate) fn attach_streams(&self) -> Result<()> {
        if self.config.open_stdin {
            let (reader, writer) = pipe();
            *self.stdin.lock().map_err(lock_err)? = Some(reader);
            *self.stdin_pipe.lock().map_err(lock_err)? = Some(writer);
        }
        Ok(())
    }

    pub(crate) fn stdout_broadcaster(&self) -> &Broadcaster {
        &self.stdout
    }

    pub(crate) fn stderr_broadcaster(&self) -> &Broadcaster {
        &self.stderr
    }

    /// Export the read-write layer as an archive
    pub fn export_rw(&self) -> Result<Archive> {
        archive::pack(&self.rw_path())
    }

    /// Export the whole root filesystem as an archive
    pub fn export(&self) -> Result<Archive> {
        self.ensure_mounted()?;
        archive::pack(&self.rootfs_path())
    }

    /// Open a log stream by name (`stdout` or `stderr`)
    pub fn read_log(&self, name: &str) -> Result<File> {
        Ok(File::open(self.log_path(name))?)
    }
}

/// Map an exit status to the conventional code: the exit code when the
/// process exited, 128 + signal when it was killed.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        code
    } else if let Some(signal) = status.signal() {
        128 + signal
    } else {
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn fresh(config: ContainerConfig) -> (tempfile::TempDir, Container) {
        let dir = tempdir().unwrap();
        let root = dir.path().join("c1");
        std::fs::create_dir(&root).unwrap();
        let container = Container::new(root, "c1".to_string(), config, "img1".to_string());
        (dir, container)
    }

    #[test]
    fn test_path_layout() {
        let (_dir, container) = fresh(ContainerConfig::new("base", vec!["/bin/true".to_string()]));
        assert!(container.json_path().ends_with("c1/config.json"));
        assert!(container.lxc_config_path().ends_with("c1/config.lxc"));
        assert!(container.rootfs_path().ends_with("c1/rootfs"));
        assert!(container.rw_path().ends_with("c1/rw"));
        assert!(container.log_path("stdout").ends_with("c1/c1-stdout.log"));
        assert!(container.log_path("stderr").ends_with("c1/c1-stderr.log"));
    }

    #[test]
    fn test_command_split() {
        let (_dir, container) = fresh(ContainerConfig::new(
            "base",
            vec!["/bin/echo".to_string(), "-n".to_string(), "hi".to_string()],
        ));
        assert_eq!(container.path, "/bin/echo");
        assert_eq!(container.args, vec!["-n", "hi"]);
    }

    #[test]
    fn test_record_round_trip() {
        let (_dir, container) = fresh(
            ContainerConfig::new("base", vec!["/bin/true".to_string()])
                .port(80)
                .env("A", "b"),
        );
        container.state.set_running(77).unwrap();
        container.state.set_stopped(3).unwrap();
        {
            let mut settings = container.settings.lock().unwrap();
            settings.ip_address = "172.17.0.9".to_string();
            settings.ip_prefix_len = 16;
            settings.gateway = "172.17.0.1".to_string();
            settings.port_mapping.insert("80".to_string(), "49153".to_string());
        }
        container.to_disk().unwrap();

        let loaded = Container::from_disk(container.root.clone()).unwrap();
        assert_eq!(loaded.id, container.id);
        assert_eq!(loaded.path, container.path);
        assert_eq!(loaded.config, container.config);
        assert_eq!(loaded.image, container.image);
        assert_eq!(loaded.state.exit_code(), 3);
        assert!(!loaded.state.is_running());
        let settings = loaded.network_settings();
        assert_eq!(settings.ip_address, "172.17.0.9");
        assert_eq!(settings.port_mapping.get("80"), Some(&"49153".to_string()));
    }

    #[test]
    fn test_unregistered_container_cannot_resolve_image() {
        let (_dir, container) = fresh(ContainerConfig::new("base", vec!["/bin/true".to_string()]));
        assert!(container.get_image().is_err());
        assert!(container.start().is_err());
    }

    #[test]
    fn test_stop_and_kill_are_noops_when_stopped() {
        let (_dir, container) = fresh(ContainerConfig::new("base", vec!["/bin/true".to_string()]));
        container.stop().unwrap();
        container.kill().unwrap();
    }

    #[test]
    fn test_stdout_pipe_sees_broadcast() {
        let (_dir, container) = fresh(ContainerConfig::new("base", vec!["/bin/true".to_string()]));
        let mut reader = container.stdout_pipe().unwrap();

        let mut sink = container.stdout.clone();
        sink.write_all(b"boo").unwrap();
        container.stdout.close();

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"boo");
    }

    #[test]
    fn test_stdin_pipe_take_once() {
        let (_dir, container) = fresh(
            ContainerConfig::new("base", vec!["/bin/cat".to_string()]).open_stdin(true),
        );
        container.attach_streams().unwrap();
        assert!(container.stdin_pipe().unwrap().is_some());
        assert!(container.stdin_pipe().unwrap().is_none());
    }

    #[test]
    fn test_closed_stdin_has_no_pipe() {
        let (_dir, container) = fresh(ContainerConfig::new("base", vec!["/bin/true".to_string()]));
        container.attach_streams().unwrap();
        assert!(container.stdin_pipe().unwrap().is_none());
    }

    #[test]
    fn test_monitor_finalizes_state() {
        let (_dir, container) = fresh(
            ContainerConfig::new("base", vec!["/bin/sh".to_string()]).open_stdin(true),
        );
        let container = Arc::new(container);
        container.set_self_ref(&container);
        container.attach_streams().unwrap();
        let first_stdin = container.stdin_pipe().unwrap();
        assert!(first_stdin.is_some());

        let child = Command::new("/bin/sh").args(["-c", "exit 3"]).spawn().unwrap();
        container.state.set_running(child.id() as i32).unwrap();
        container.clone().monitor(child);

        assert!(!container.state.is_running());
        assert_eq!(container.state.exit_code(), 3);
        // The stopped state was persisted.
        let loaded = Container::from_disk(container.root().to_path_buf()).unwrap();
        assert_eq!(loaded.state.exit_code(), 3);
        assert!(!loaded.state.is_running());
        // A fresh stdin pair is wired for the next run.
        assert!(container.stdin_pipe().unwrap().is_some());
    }

    #[test]
    fn test_stop_escalates_to_kill() {
        let (_dir, container) = fresh(ContainerConfig::new(
            "base",
            vec!["/bin/sleep".to_string(), "30".to_string()],
        ));
        let mut child = Command::new("/bin/sleep").arg("30").spawn().unwrap();
        container.state.set_running(child.id() as i32).unwrap();

        // Stand in for the monitor: reap the child and record its exit.
        let state = &container.state;
        std::thread::scope(|scope| {
            scope.spawn(move || {
                let status = child.wait().unwrap();
                state.set_stopped(exit_code_of(status)).unwrap();
            });
            // The helper's terminate control is unavailable here, so stop
            // escalates straight to the unconditional kill.
            container.stop().unwrap();
        });

        assert!(!container.state.is_running());
        assert_eq!(container.state.exit_code(), 137);
    }

    #[test]
    fn test_exit_code_of_signal() {
        // A process killed by SIGKILL reports 128 + 9.
        let status = Command::new("/bin/sh")
            .args(["-c", "kill -9 $$"])
            .status()
            .unwrap();
        assert_eq!(exit_code_of(status), 137);

        let status = Command::new("/bin/sh").args(["-c", "exit 4"]).status().unwrap();
        assert_eq!(exit_code_of(status), 4);
    }
}
