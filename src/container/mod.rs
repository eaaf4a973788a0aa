//! Container records, configuration, state and supervision

pub mod config;
pub mod lxc;
pub mod runtime;
pub mod state;

pub use config::{ContainerConfig, NetworkSettings};
pub use runtime::Container;
pub use state::{State, StateData};
