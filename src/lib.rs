//! Cask - a layered-image container engine core
//!
//! Cask packages root filesystems as layered images, instantiates them
//! as isolated processes with their own network endpoint, and manages
//! their lifecycle. It provides:
//!
//! - An image graph: immutable nodes linked by parent edges, mounted by
//!   stacking ancestor layers over a private read-write layer
//! - A persistent tag store mapping human names to image ids
//! - Container creation, supervision, stop/kill escalation and
//!   crash-recovery of persisted containers
//! - IP and port pools with host-to-container port forwarding
//! - Committing a running container's read-write layer as a new image
//!
//! The command-line front-end, the union filesystem driver, the
//! isolation helper and the in-container init are external
//! collaborators; cask drives them at their boundaries.

pub mod archive;
pub mod container;
pub mod error;
pub mod image;
pub mod mount;
pub mod network;
pub mod runtime;
pub mod stdio;
pub mod syscall;

pub use container::{Container, ContainerConfig, NetworkSettings, State};
pub use error::{CaskError, Result};
pub use image::{Graph, ImageNode, TagStore};
pub use network::{NetworkInterface, NetworkManager};
pub use runtime::{Runtime, RuntimeOptions};
