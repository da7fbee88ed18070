//! Common re-exports for convenience.
//!
//! ```rust
//! use shmkit_common::prelude::*;
//!
//! let bytes = ElementType::Float64.width() * 16;
//! assert_eq!(bytes, 128);
//! ```

pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::shm::consts::{
    DEFAULT_PERMISSIONS, KEY_MAX, KEY_MIN, LENGTH_MAX, SIZE_HEADER_LEN,
};
pub use crate::shm::element::{Element, ElementType};
pub use crate::shm::flags::{
    MapFlags, PosixOpenFlags, SysvAttachFlags, SysvCreateFlags, parse_permissions,
};
