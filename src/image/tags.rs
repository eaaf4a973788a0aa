//! Tag store - persistent mapping of human names to image ids
//!
//! The whole store is one serialized blob: `{"Repositories": {repo:
//! {tag: id}}}`. Every operation reloads the blob first so changes made
//! by other owners of the file are observed, and every mutation writes
//! the blob back in full. Concurrent writers can lose updates; the store
//! assumes a single owning process.

use crate::error::{CaskError, Result};
use crate::image::graph::Graph;
use crate::image::node::ImageNode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Tag applied when none is given
pub const DEFAULT_TAG: &str = "latest";

/// Tag → image id mapping within one repository
pub type Repository = HashMap<String, String>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TagIndex {
    #[serde(rename = "Repositories")]
    repositories: HashMap<String, Repository>,
}

/// Persistent name → image id index
#[derive(Debug)]
pub struct TagStore {
    path: PathBuf,
    graph: Graph,
    index: TagIndex,
}

/// Validate a repository name: non-empty, no `:`
pub fn validate_repo_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CaskError::InvalidName(
            "Repository name can't be empty".to_string(),
        ));
    }
    if name.contains(':') {
        return Err(CaskError::InvalidName(format!(
            "Illegal repository name: {}",
            name
        )));
    }
    Ok(())
}

/// Validate a tag name: non-empty, no `:` or `/`
pub fn validate_tag_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CaskError::InvalidName("Tag name can't be empty".to_string()));
    }
    if name.contains(':') || name.contains('/') {
        return Err(CaskError::InvalidName(format!("Illegal tag name: {}", name)));
    }
    Ok(())
}

impl TagStore {
    /// Open a tag store backed by a blob file, creating the blob when it
    /// does not exist yet
    pub fn new(path: &Path, graph: Graph) -> Result<TagStore> {
        let abspath = std::path::absolute(path)?;
        let mut store = TagStore {
            path: abspath,
            graph,
            index: TagIndex::default(),
        };
        match store.reload() {
            Ok(()) => {}
            Err(CaskError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                store.save()?;
            }
            Err(e) => return Err(e),
        }
        Ok(store)
    }

    /// Write the whole index back to disk, atomically
    pub fn save(&self) -> Result<()> {
        let data = serde_json::to_vec(&self.index)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Re-read the index from disk
    pub fn reload(&mut self) -> Result<()> {
        let data = std::fs::read(&self.path)?;
        self.index = serde_json::from_slice(&data)?;
        Ok(())
    }

    /// Bind `repo:tag` to the image named by `name`.
    ///
    /// `name` may be an id or another `repo[:tag]` reference; the tag
    /// defaults to `latest`. Re-binding an existing `repo:tag` requires
    /// `force`.
    pub fn set(&mut self, repo_name: &str, tag: &str, name: &str, force: bool) -> Result<()> {
        let img = self.lookup_image(name)?;
        let tag = if tag.is_empty() { DEFAULT_TAG } else { tag };
        validate_repo_name(repo_name)?;
        validate_tag_name(tag)?;
        self.reload()?;
        let repo = self.index.repositories.entry(repo_name.to_string()).or_default();
        if let Some(old) = repo.get(tag) {
            if !force {
                return Err(CaskError::TagConflict(format!(
                    "Tag {}:{} is already set to {}",
                    repo_name, tag, old
                )));
            }
        }
        repo.insert(tag.to_string(), img.id);
        self.save()
    }

    /// The tag → id mapping of a repository, or `None` when the
    /// repository does not exist. Absence is not an error.
    pub fn get(&mut self, repo_name: &str) -> Result<Option<Repository>> {
        self.reload()?;
        Ok(self.index.repositories.get(repo_name).cloned())
    }

    /// Resolve `repo:tag` to its image node.
    ///
    /// Three-valued: the node when found, `None` when the repository or
    /// tag is absent, an error when resolution itself fails.
    pub fn get_image(&mut self, repo_name: &str, tag: &str) -> Result<Option<ImageNode>> {
        let Some(repo) = self.get(repo_name)? else {
            return Ok(None);
        };
        match repo.get(tag) {
            Some(id) => Ok(Some(self.graph.get(id)?)),
            None => Ok(None),
        }
    }

    /// Resolve a name to an image node.
    ///
    /// A name that the graph knows as an id wins; otherwise the name is
    /// split on its first `:` (tag defaulting to `latest`) and resolved
    /// through the repositories.
    pub fn lookup_image(&mut self, name: &str) -> Result<ImageNode> {
        if let Ok(img) = self.graph.get(name) {
            return Ok(img);
        }
        let (repo, tag) = match name.split_once(':') {
            Some((repo, tag)) => (repo, tag),
            None => (name, DEFAULT_TAG),
        };
        match self.get_image(repo, tag)? {
            Some(img) => Ok(img),
            None => Err(CaskError::ImageNotFound(name.to_string())),
        }
    }

    /// Reverse index: image id → every `repo:tag` bound to it
    pub fn by_id(&self) -> HashMap<String, Vec<String>> {
        let mut by_id: HashMap<String, Vec<String>> = HashMap::new();
        for (repo_name, repository) in &self.index.repositories {
            for (tag, id) in repository {
                by_id
                    .entry(id.clone())
                    .or_default()
                    .push(format!("{}:{}", repo_name, tag));
            }
        }
        by_id
    }

    /// The first name bound to an id, or the id itself when unnamed
    pub fn image_name(&self, id: &str) -> String {
        match self.by_id().get(id) {
            Some(names) if !names.is_empty() => names[0].clone(),
            _ => id.to_string(),
        }
    }
}
