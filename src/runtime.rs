//! Runtime facade
//!
//! The runtime owns the image graph, the tag store, the network manager
//! and the live container list. Containers are created here, restored
//! from disk after a crash, and destroyed here; committing a container
//! snapshots its read-write layer into the graph.

use crate::container::{Container, ContainerConfig};
use crate::error::{CaskError, Result};
use crate::image::node::{self, generate_id};
use crate::image::{Graph, ImageNode, TagStore};
use crate::network::{Ipv4Network, NetworkManager};
use crate::stdio::Broadcaster;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Default runtime root
pub const DEFAULT_ROOT: &str = "/var/lib/cask";

/// Default bridge interface containers attach to
pub const DEFAULT_BRIDGE_IFACE: &str = "lxcbr0";

/// Default host port range handed out to containers
pub const DEFAULT_PORT_RANGE: (u16, u16) = (49153, 65535);

fn lock_err<T>(_: T) -> CaskError {
    CaskError::Lock("Failed to acquire runtime lock".to_string())
}

/// Construction options for a [`Runtime`]
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Root directory of all engine state
    pub root: PathBuf,
    /// Bridge interface containers attach to
    pub bridge_iface: String,
    /// Host port range `[start, end)` for forwarded ports
    pub port_range: (u16, u16),
    /// Container network; read from the bridge interface when `None`
    pub network: Option<Ipv4Network>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            bridge_iface: DEFAULT_BRIDGE_IFACE.to_string(),
            port_range: DEFAULT_PORT_RANGE,
            network: None,
        }
    }
}

/// The engine: image graph, tag store, networking and live containers
pub struct Runtime {
    root: PathBuf,
    repository: PathBuf,
    containers: Mutex<Vec<Arc<Container>>>,
    graph: Graph,
    repositories: Mutex<TagStore>,
    network: NetworkManager,
}

impl Runtime {
    /// Build a runtime rooted at the default location
    pub fn new() -> Result<Arc<Runtime>> {
        Self::from_options(RuntimeOptions::default())
    }

    /// Build a runtime from explicit options, then restore persisted
    /// containers
    pub fn from_options(options: RuntimeOptions) -> Result<Arc<Runtime>> {
        let root = std::path::absolute(&options.root)?;
        let repository = root.join("containers");
        std::fs::create_dir_all(&repository)?;

        let graph = Graph::new(&root.join("graph"))?;
        let repositories = TagStore::new(&root.join("repositories"), graph.clone())?;
        let network = match options.network {
            Some(net) => {
                NetworkManager::with_network(&options.bridge_iface, net, options.port_range)?
            }
            None => NetworkManager::new(&options.bridge_iface, options.port_range)?,
        };

        let runtime = Arc::new(Runtime {
            root,
            repository,
            containers: Mutex::new(Vec::new()),
            graph,
            repositories: Mutex::new(repositories),
            network,
        });
        runtime.restore()?;
        Ok(runtime)
    }

    /// Root directory of all engine state
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The image graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The tag store, behind its lock
    pub fn tag_store(&self) -> Result<MutexGuard<'_, TagStore>> {
        self.repositories.lock().map_err(lock_err)
    }

    /// The network manager
    pub fn network_manager(&self) -> &NetworkManager {
        &self.network
    }

    /// Resolve an image name (id or `repo[:tag]`) through the tag store
    pub fn lookup_image(&self, name: &str) -> Result<ImageNode> {
        self.tag_store()?.lookup_image(name)
    }

    fn container_root(&self, id: &str) -> PathBuf {
        self.repository.join(id)
    }

    /// Look up a live container by id
    pub fn get(&self, id: &str) -> Option<Arc<Container>> {
        self.containers
            .lock()
            .ok()?
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// Whether a live container with this id exists
    pub fn exists(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// All live containers, most recently created first
    pub fn list(&self) -> Vec<Arc<Container>> {
        let mut containers = self
            .containers
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();
        containers.sort_by(|a, b| b.created.cmp(&a.created));
        containers
    }

    /// Create a container from a config.
    ///
    /// Resolves the image, gives the container a fresh id, creates its
    /// directory (which doubles as a uniqueness barrier), persists the
    /// record and registers it.
    pub fn create(self: &Arc<Self>, config: ContainerConfig) -> Result<Arc<Container>> {
        let image = self.lookup_image(&config.image)?;
        if config.cmd.is_empty() {
            return Err(CaskError::Container("No command specified".to_string()));
        }

        let id = generate_id();
        let root = self.container_root(&id);
        if let Err(e) = std::fs::create_dir(&root) {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                return Err(CaskError::ContainerExists(id));
            }
            return Err(e.into());
        }

        let container = Container::new(root, id, config, image.id);
        container.to_disk()?;
        self.register(container)
    }

    /// Load a persisted container by id and register it
    pub fn load(self: &Arc<Self>, id: &str) -> Result<Arc<Container>> {
        let container = Container::from_disk(self.container_root(id))?;
        if container.id != id {
            return Err(CaskError::Container(format!(
                "Container {} is stored at {}",
                container.id, id
            )));
        }
        self.register(container)
    }

    /// Make a container usable by the runtime: wire the back-reference,
    /// stdin plumbing and log files, then add it to the live list.
    pub fn register(self: &Arc<Self>, container: Container) -> Result<Arc<Container>> {
        validate_container_id(&container.id)?;
        if container.is_registered() || self.exists(&container.id) {
            return Err(CaskError::ContainerExists(container.id.clone()));
        }

        container.set_runtime(self);
        container.attach_streams()?;
        self.log_to_disk(container.stdout_broadcaster(), &container.log_path("stdout"))?;
        self.log_to_disk(container.stderr_broadcaster(), &container.log_path("stderr"))?;

        let container = Arc::new(container);
        container.set_self_ref(&container);
        self.containers
            .lock()
            .map_err(lock_err)?
            .push(container.clone());
        Ok(container)
    }

    /// Tee a broadcaster into a log file. The tee outlives monitor
    /// teardown so every run of the container reaches the same log.
    fn log_to_disk(&self, src: &Broadcaster, dst: &Path) -> Result<()> {
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dst)?;
        src.tee(Box::new(log));
        Ok(())
    }

    /// Stop a container, drop it from the live list and remove its
    /// directory. The list removal happens before the filesystem
    /// removal to avoid races with concurrent lookups.
    pub fn destroy(&self, container: &Arc<Container>) -> Result<()> {
        if !self.exists(&container.id) {
            return Err(CaskError::ContainerNotFound(format!(
                "{} - maybe it was already destroyed?",
                container.id
            )));
        }
        container.stop()?;
        if container.mounted()? {
            container.unmount().map_err(|e| {
                CaskError::Container(format!("Unable to unmount container {}: {}", container.id, e))
            })?;
        }
        self.containers
            .lock()
            .map_err(lock_err)?
            .retain(|c| c.id != container.id);
        std::fs::remove_dir_all(container.root()).map_err(|e| {
            CaskError::Container(format!(
                "Unable to remove filesystem for {}: {}",
                container.id, e
            ))
        })?;
        Ok(())
    }

    /// Create a new image from the current state of a container's
    /// read-write layer, optionally binding `repo[:tag]` to it.
    ///
    /// The layer is exported without stopping the container; a writer
    /// racing the export can tear the archive.
    pub fn commit(&self, id: &str, repo: &str, tag: &str) -> Result<ImageNode> {
        let container = self
            .get(id)
            .ok_or_else(|| CaskError::ContainerNotFound(id.to_string()))?;
        let rw_tar = container.export_rw()?;
        let image = self.graph.create(
            rw_tar,
            Some(&container.image),
            Some(&container.id),
            Some(container.config.clone()),
            "",
        )?;
        if !repo.is_empty() {
            self.tag_store()?.set(repo, tag, &image.id, true)?;
        }
        Ok(image)
    }

    /// Load every persisted container from disk, skipping entries that
    /// fail to load. Nothing is restarted.
    fn restore(self: &Arc<Self>) -> Result<()> {
        for entry in std::fs::read_dir(&self.repository)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name.to_str() else { continue };
            match self.load(id) {
                Ok(container) => tracing::debug!("Loaded container {}", container.id),
                Err(e) => {
                    tracing::debug!("Failed to load container {}: {}", id, e);
                    continue;
                }
            }
        }
        Ok(())
    }
}

/// Validate a container id
pub fn validate_container_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(CaskError::InvalidId("Invalid empty id".to_string()));
    }
    node::validate_id(id).map_err(|_| {
        CaskError::InvalidId(format!("Invalid character in container id: {}", id))
    })
}
