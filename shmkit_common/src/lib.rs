//! shmkit Common Library
//!
//! Constants, element types and configuration loading shared by every
//! crate of the shmkit workspace.
//!
//! # Module Structure
//!
//! - [`shm`] - OS flag constants, typed flag sets and the element-type table
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! shmkit = { package = "shmkit_common", path = "../shmkit_common" }
//! ```
//!
//! Then import:
//! ```rust,ignore
//! use shmkit::shm::consts::*;
//! use shmkit::shm::element::ElementType;
//! use shmkit::config::{ConfigLoader, SharedConfig};
//! ```

pub mod config;
pub mod prelude;
pub mod shm;
