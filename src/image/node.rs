//! Image nodes
//!
//! An image node is an immutable record with a parent pointer: a metadata
//! blob plus an unpacked layer directory. Mounting a node stacks its
//! whole ancestry over a private read-write layer and re-materializes the
//! whiteouts that hide paths deleted along the way.

use crate::archive;
use crate::error::{CaskError, Result};
use crate::image::changes::{changes, Change, ChangeKind, WHITEOUT_PREFIX};
use crate::image::graph::Graph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::container::config::ContainerConfig;

/// An immutable image record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageNode {
    /// Image id
    pub id: String,
    /// Parent image id, empty for a root image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,
    /// Free-form comment
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    /// Creation timestamp
    pub created: DateTime<Utc>,
    /// Id of the container this image was committed from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container: String,
    /// Config snapshot of that container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_config: Option<ContainerConfig>,
    #[serde(skip)]
    graph: Option<Graph>,
}

/// Validate an image id: non-empty, no `:`
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(CaskError::InvalidId("Image id can't be empty".to_string()));
    }
    if id.contains(':') {
        return Err(CaskError::InvalidId(format!(
            "Invalid character in image id: '{}'",
            id
        )));
    }
    Ok(())
}

/// Generate a fresh image id: the first 8 bytes, hex-encoded, of a
/// SHA-256 digest over random input drawn per call.
pub fn generate_id() -> String {
    let seed: [u8; 32] = rand::random();
    let digest = Sha256::digest(seed);
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Metadata blob path under an image root
pub(crate) fn json_path(root: &Path) -> PathBuf {
    root.join("json")
}

/// Layer directory path under an image root
pub(crate) fn layer_path(root: &Path) -> PathBuf {
    root.join("layer")
}

impl ImageNode {
    /// Create an unregistered node with a fresh id
    pub fn new(
        parent: &str,
        comment: &str,
        container: &str,
        container_config: Option<ContainerConfig>,
    ) -> Self {
        Self {
            id: generate_id(),
            parent: parent.to_string(),
            comment: comment.to_string(),
            created: Utc::now(),
            container: container.to_string(),
            container_config,
            graph: None,
        }
    }

    /// Load a node from its on-disk root.
    ///
    /// Fails when the metadata blob is unreadable, the stored id is
    /// invalid, or the layer directory is missing or not a directory.
    pub fn load(root: &Path) -> Result<ImageNode> {
        let data = std::fs::read(json_path(root))?;
        let node: ImageNode = serde_json::from_slice(&data)?;
        validate_id(&node.id)?;

        let layer = layer_path(root);
        match std::fs::metadata(&layer) {
            Ok(meta) if meta.is_dir() => Ok(node),
            Ok(_) => Err(CaskError::Image(format!(
                "Couldn't load image {}: {} is not a directory",
                node.id,
                layer.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CaskError::Image(format!(
                "Couldn't load image {}: no filesystem layer",
                node.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Store a node at an on-disk root: unpack the layer archive, then
    /// write the metadata blob. The root must not exist yet.
    pub fn store<R: Read>(node: &ImageNode, layer_data: R, root: &Path) -> Result<()> {
        match std::fs::metadata(root) {
            Ok(_) => {
                return Err(CaskError::ImageExists(node.id.clone()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        archive::unpack(layer_data, &layer_path(root))?;
        let data = serde_json::to_vec(node)?;
        std::fs::write(json_path(root), data)?;
        Ok(())
    }

    /// Bind this node to the graph that stores it
    pub(crate) fn bind(&mut self, graph: Graph) {
        self.graph = Some(graph);
    }

    fn graph(&self) -> Result<&Graph> {
        self.graph
            .as_ref()
            .ok_or_else(|| CaskError::Image("Can't operate on an unregistered image".to_string()))
    }

    /// Storage root of this node within its graph
    pub fn root(&self) -> Result<PathBuf> {
        Ok(self.graph()?.image_root(&self.id))
    }

    /// On-disk layer directory of this node
    pub fn layer(&self) -> Result<PathBuf> {
        Ok(layer_path(&self.root()?))
    }

    /// Resolve the parent node, if any
    pub fn parent_node(&self) -> Result<Option<ImageNode>> {
        if self.parent.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.graph()?.get(&self.parent)?))
    }

    /// The ancestry chain from this node up to the root parent, this
    /// node first. Deterministic.
    pub fn history(&self) -> Result<Vec<ImageNode>> {
        let mut chain = vec![self.clone()];
        let mut current = self.parent_node()?;
        while let Some(node) = current {
            current = node.parent_node()?;
            chain.push(node);
        }
        Ok(chain)
    }

    /// The layer directories backing the ancestry chain, same order as
    /// [`history`](Self::history).
    pub fn layers(&self) -> Result<Vec<PathBuf>> {
        let mut list = Vec::new();
        for node in self.history()? {
            list.push(node.layer()?);
        }
        if list.is_empty() {
            return Err(CaskError::Image(format!("No layer found for image {}", self.id)));
        }
        Ok(list)
    }

    /// Mount the ancestry at `root` with `rw` as the private read-write
    /// layer.
    ///
    /// After the layered mount, the changeset of this node's own layer
    /// relative to its ancestors is scanned and every deletion becomes a
    /// whiteout file under `rw`, so paths deleted by this image stay
    /// hidden. Fails if `root` is already mounted.
    pub fn mount(&self, root: &Path, rw: &Path) -> Result<()> {
        if crate::mount::is_mount_point(root)? {
            return Err(CaskError::Mount(format!(
                "{} is already mounted",
                root.display()
            )));
        }
        let layers = self.layers()?;
        std::fs::create_dir_all(root)?;
        std::fs::create_dir_all(rw)?;
        crate::mount::mount_layered(&layers, rw, root)?;

        if layers.len() > 1 {
            let changeset = changes(&layers[1..], &layers[0])?;
            write_whiteouts(&changeset, rw)?;
        }
        Ok(())
    }

    /// The changeset of an upper directory relative to this node's
    /// stacked layers.
    pub fn changes(&self, rw: &Path) -> Result<Vec<Change>> {
        changes(&self.layers()?, rw)
    }
}

/// Materialize the deletions of a changeset as whiteout files under `rw`.
fn write_whiteouts(changeset: &[Change], rw: &Path) -> Result<()> {
    for change in changeset {
        if change.kind != ChangeKind::Delete {
            continue;
        }
        let rel = change.path.strip_prefix("/").unwrap_or(&change.path);
        let dir = match rel.parent() {
            Some(parent) => rw.join(parent),
            None => rw.to_path_buf(),
        };
        std::fs::create_dir_all(&dir)?;
        let name = rel
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CaskError::Image(format!("Bad deletion path {}", change.path.display())))?;
        std::fs::File::create(dir.join(format!("{}{}", WHITEOUT_PREFIX, name)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn empty_tar() -> Cursor<Vec<u8>> {
        let builder = tar::Builder::new(Vec::new());
        Cursor::new(builder.into_inner().unwrap())
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("abc123").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("repo:tag").is_err());
    }

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_id());
    }

    #[test]
    fn test_store_load_round_trip() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("img");
        let node = ImageNode::new("", "initial import", "", None);
        ImageNode::store(&node, empty_tar(), &root).unwrap();

        let loaded = ImageNode::load(&root).unwrap();
        assert_eq!(loaded.id, node.id);
        assert_eq!(loaded.comment, "initial import");
        assert!(loaded.parent.is_empty());
    }

    #[test]
    fn test_store_refuses_existing_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("img");
        let node = ImageNode::new("", "", "", None);
        ImageNode::store(&node, empty_tar(), &root).unwrap();
        assert!(ImageNode::store(&node, empty_tar(), &root).is_err());
    }

    #[test]
    fn test_load_requires_layer_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("img");
        std::fs::create_dir(&root).unwrap();
        let node = ImageNode::new("", "", "", None);
        std::fs::write(json_path(&root), serde_json::to_vec(&node).unwrap()).unwrap();

        assert!(ImageNode::load(&root).is_err());
    }

    #[test]
    fn test_metadata_blob_fields() {
        let mut node = ImageNode::new("parentid", "note", "containerid", None);
        node.id = "deadbeefdeadbeef".to_string();
        let blob: serde_json::Value = serde_json::to_value(&node).unwrap();
        assert_eq!(blob["id"], "deadbeefdeadbeef");
        assert_eq!(blob["parent"], "parentid");
        assert_eq!(blob["comment"], "note");
        assert_eq!(blob["container"], "containerid");
        assert!(blob.get("created").is_some());
    }

    #[test]
    fn test_write_whiteouts() {
        let dir = tempdir().unwrap();
        let rw = dir.path().join("rw");
        std::fs::create_dir(&rw).unwrap();
        let changeset = vec![
            Change {
                path: PathBuf::from("/a/b.txt"),
                kind: ChangeKind::Delete,
            },
            Change {
                path: PathBuf::from("/kept.txt"),
                kind: ChangeKind::Add,
            },
        ];

        write_whiteouts(&changeset, &rw).unwrap();

        let marker = rw.join("a/.wh.b.txt");
        assert!(marker.is_file());
        assert_eq!(std::fs::metadata(&marker).unwrap().len(), 0);
        assert!(!rw.join(".wh.kept.txt").exists());
    }
}
