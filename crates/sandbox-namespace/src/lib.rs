//! sandbox-namespace: Linux namespace selection with user namespace support
//!
//! Provides the namespace set for the sandboxed process and the UID/GID
//! mappings used when user namespace remapping is enabled.

pub mod config;
pub mod user_ns;

pub use config::NamespaceConfig;
pub use user_ns::{IdMapping, IdMappings, UserNamespaceConfig, build_id_mappings};
