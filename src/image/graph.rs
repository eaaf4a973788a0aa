//! Image graph - on-disk store of image nodes
//!
//! Each node lives under `<root>/<id>` as a metadata blob plus an
//! unpacked layer directory. Registration stages the node under
//! `<root>/:tmp:` and commits it with a single rename, so concurrent
//! registers of the same id race safely: exactly one wins. Deleted nodes
//! are parked under `<root>/:garbage:` until swept.

use crate::error::{CaskError, Result};
use crate::image::node::{self, ImageNode};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::container::config::ContainerConfig;

/// Staging area for in-progress registrations
const TMP_DIR: &str = ":tmp:";

/// Recycle area for soft-deleted nodes
const GARBAGE_DIR: &str = ":garbage:";

/// On-disk image store
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    root: PathBuf,
}

impl Graph {
    /// Open a graph rooted at a directory, creating it if needed
    pub fn new(root: &Path) -> Result<Graph> {
        let abspath = std::path::absolute(root)?;
        if let Err(e) = std::fs::create_dir(&abspath) {
            if e.kind() != std::io::ErrorKind::AlreadyExists {
                return Err(e.into());
            }
        }
        Ok(Graph { root: abspath })
    }

    /// Root directory of the graph
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage root of a node, `<root>/<id>`
    pub fn image_root(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Check whether a node is present
    pub fn exists(&self, id: &str) -> bool {
        self.get(id).is_ok()
    }

    /// Load a node by id.
    ///
    /// Fails when the stored metadata carries a different id than the
    /// storage location, or when the layer directory is missing.
    pub fn get(&self, id: &str) -> Result<ImageNode> {
        let mut node = ImageNode::load(&self.image_root(id))?;
        if node.id != id {
            return Err(CaskError::Image(format!(
                "Image stored at '{}' has wrong id '{}'",
                id, node.id
            )));
        }
        node.bind(self.clone());
        Ok(node)
    }

    /// Synthesize and register a node from a layer archive.
    ///
    /// When the layer was exported from a container, the new node points
    /// at the container's image as its parent and snapshots the
    /// container's config.
    pub fn create<R: Read>(
        &self,
        layer_data: R,
        parent: Option<&str>,
        container: Option<&str>,
        container_config: Option<ContainerConfig>,
        comment: &str,
    ) -> Result<ImageNode> {
        let mut node = ImageNode::new(
            parent.unwrap_or_default(),
            comment,
            container.unwrap_or_default(),
            container_config,
        );
        self.register(layer_data, &mut node)?;
        Ok(node)
    }

    /// Register a node: unpack the layer and write the metadata under
    /// the staging area, then rename into place. The rename is the
    /// commit point.
    pub fn register<R: Read>(&self, layer_data: R, node: &mut ImageNode) -> Result<()> {
        node::validate_id(&node.id)?;
        // A convenience to fail fast; the rename below settles races.
        if self.exists(&node.id) {
            return Err(CaskError::ImageExists(node.id.clone()));
        }
        let tmp = self.mktemp(&node.id)?;
        let result = ImageNode::store(node, layer_data, &tmp).and_then(|_| {
            std::fs::rename(&tmp, self.image_root(&node.id)).map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists
                    || e.kind() == std::io::ErrorKind::DirectoryNotEmpty
                {
                    CaskError::ImageExists(node.id.clone())
                } else {
                    e.into()
                }
            })
        });
        if result.is_err() {
            let _ = std::fs::remove_dir_all(&tmp);
        }
        result?;
        node.bind(self.clone());
        Ok(())
    }

    /// Reserve a staging path for a registration in progress
    pub fn mktemp(&self, id: &str) -> Result<PathBuf> {
        let tmp = Graph::new(&self.root.join(TMP_DIR))
            .map_err(|e| CaskError::Image(format!("Couldn't create staging area: {}", e)))?;
        if tmp.exists(id) {
            return Err(CaskError::ImageExists(id.to_string()));
        }
        Ok(tmp.image_root(id))
    }

    fn garbage(&self) -> Result<Graph> {
        Graph::new(&self.root.join(GARBAGE_DIR))
            .map_err(|e| CaskError::Image(format!("Couldn't create recycle area: {}", e)))
    }

    /// Soft-delete a node by parking it in the recycle area
    pub fn delete(&self, id: &str) -> Result<()> {
        let garbage = self.garbage()?;
        std::fs::rename(self.image_root(id), garbage.image_root(id))?;
        Ok(())
    }

    /// Restore a soft-deleted node
    pub fn undelete(&self, id: &str) -> Result<()> {
        let garbage = self.garbage()?;
        std::fs::rename(garbage.image_root(id), self.image_root(id))?;
        Ok(())
    }

    /// Permanently remove everything in the recycle area
    pub fn garbage_collect(&self) -> Result<()> {
        let garbage = self.garbage()?;
        std::fs::remove_dir_all(garbage.root())?;
        Ok(())
    }

    /// Visit every loadable node in the graph, skipping entries that
    /// fail to load (staging and recycle areas fail naturally).
    pub fn walk<F: FnMut(ImageNode)>(&self, mut handler: F) -> Result<()> {
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name.to_str() else { continue };
            match self.get(id) {
                Ok(node) => handler(node),
                Err(_) => continue,
            }
        }
        Ok(())
    }

    /// All loadable nodes
    pub fn all(&self) -> Result<Vec<ImageNode>> {
        let mut images = Vec::new();
        self.walk(|node| images.push(node))?;
        Ok(images)
    }

    /// All loadable nodes, keyed by id
    pub fn map(&self) -> Result<HashMap<String, ImageNode>> {
        let mut images = HashMap::new();
        self.walk(|node| {
            images.insert(node.id.clone(), node);
        })?;
        Ok(images)
    }

    /// Children grouped by parent id. Nodes without a parent, or whose
    /// parent fails to load, are not listed as children.
    pub fn by_parent(&self) -> Result<HashMap<String, Vec<ImageNode>>> {
        let mut by_parent: HashMap<String, Vec<ImageNode>> = HashMap::new();
        self.walk(|node| {
            if node.parent.is_empty() || !self.exists(&node.parent) {
                return;
            }
            by_parent.entry(node.parent.clone()).or_default().push(node);
        })?;
        Ok(by_parent)
    }

    /// Head nodes: nodes that are not the parent of any other node
    pub fn heads(&self) -> Result<HashMap<String, ImageNode>> {
        let by_parent = self.by_parent()?;
        let mut heads = HashMap::new();
        self.walk(|node| {
            if !by_parent.contains_key(&node.id) {
                heads.insert(node.id.clone(), node);
            }
        })?;
        Ok(heads)
    }
}
