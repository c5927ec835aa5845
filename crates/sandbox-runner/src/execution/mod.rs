//! Execution layer: the namespace runtime behind the container traits

pub mod process;

pub use process::{NamespaceHandle, NamespaceRuntime};
