//! sandbox-fs: Overlay root and bind mounts for the sandbox runner
//!
//! The supervisor validates the overlay directories; the sandboxed child
//! mounts the overlay and the extra binds inside its own mount namespace.

pub mod filesystem;
pub mod mounts;

pub use filesystem::{prepare, OverlayConfig};
pub use mounts::{BindMount, MountConfig};
