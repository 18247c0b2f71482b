//! Engine-agnostic container types shared by every runtime adapter.

pub mod container;

pub use container::{ContainerSpec, ContainerState, ContainerSummary, PortMapping};
