//! Image graph, nodes, changesets and the tag store

pub mod changes;
pub mod graph;
pub mod node;
pub mod tags;

pub use changes::{Change, ChangeKind};
pub use graph::Graph;
pub use node::ImageNode;
pub use tags::TagStore;
