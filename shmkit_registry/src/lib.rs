//! # shmkit Shared Memory Registry
//!
//! Process-local registry and lifecycle manager for OS shared memory. Both
//! System-V segments (key and identifier based) and POSIX objects (name and
//! descriptor based) are created or opened, tracked once per process,
//! reference counted and torn down deterministically. Callers receive a
//! [`ViewDescriptor`] (address, element count, element type) to build
//! zero-copy typed views over the mapped bytes.
//!
//! ## Features
//!
//! - **One handle per resource**: repeated `get` calls for the same segment
//!   or name share one mapping and one registry entry
//! - **Attach-count aware destruction**: a System-V segment is removed only
//!   when nothing is attached, unless destruction is forced
//! - **Exact size recovery for POSIX**: an 8-byte header stores the logical
//!   size so openers recover the creator's element count
//! - **Deterministic teardown**: `detach_all`, coordinator drop, the
//!   process exit hook and an optional signal handler all sweep the registry
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────────┐    ┌──────────────┐
//! │  ShmManager  │───►│ LifecycleCoordinator │───►│ SysvBackend  │
//! │ (Arc+Mutex)  │    │  Registry  Counters  │    │ PosixBackend │
//! └──────┬───────┘    └──────────┬───────────┘    └──────────────┘
//!        │                       │
//!   ViewGuard (weak)        ExitHook (atexit / signals)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shmkit_registry::{ShmManager, ElementType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ShmManager::new();
//!
//! // System-V segment under a random key
//! if let Some((key, view)) = manager.create(256, ElementType::Float64, None, None)? {
//!     if let Some(samples) = unsafe { view.as_mut_slice::<f64>() } {
//!         samples.fill(0.0);
//!     }
//!     manager.destroy(key)?;
//! }
//!
//! // POSIX object released when the guard drops
//! if let Some(view) = manager.create_posix("/frames", 1024, ElementType::Uint8, Some("640"))? {
//!     let _guard = manager.guard(view);
//! }
//! manager.destroy_posix("/frames")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Absent resources are `Ok(None)`, never an error. Everything else is a
//! [`ShmError`]:
//!
//! ```rust,no_run
//! use shmkit_registry::{ShmError, ShmManager, ElementType};
//!
//! match ShmManager::new().open(0x1234, ElementType::Int32) {
//!     Ok(Some(view)) => println!("{} elements", view.element_count()),
//!     Ok(None) => eprintln!("segment 0x1234 does not exist"),
//!     Err(ShmError::OutOfRange { detail, .. }) => eprintln!("bad request: {detail}"),
//!     Err(e) => eprintln!("unexpected error: {e}"),
//! }
//! ```
//!
//! ## Thread Safety
//!
//! - **LifecycleCoordinator**: `Send`, not shared; wrap it or use `ShmManager`
//! - **ShmManager**: cloneable, every call takes one coarse mutex
//! - **Mapped bytes**: not synchronised; coordinate access between threads
//!   and processes yourself

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod error;
pub mod exit;
pub mod handle;
pub mod lifecycle;
pub mod manager;
pub mod registry;

pub use backend::{
    CleanupMode, DetachStatus, PosixBackend, PosixRequest, SysvBackend, SysvRequest,
};
pub use config::{RegistryConfig, ShmConfig};
pub use error::{ShmError, ShmResult};
pub use exit::ExitHook;
pub use handle::{HandleInfo, ResourceHandle, ResourceKey, ResourceKind, ViewDescriptor};
pub use lifecycle::{Counters, LifecycleCoordinator, SweepReport};
pub use manager::{ShmManager, ViewGuard};
pub use registry::Registry;
pub use shmkit::config::LogLevel;
pub use shmkit::shm::element::{Element, ElementType};
pub use shmkit::shm::flags::{MapFlags, PosixOpenFlags, SysvAttachFlags, SysvCreateFlags};

/// Initialize tracing from `RUST_LOG`
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Initialize tracing, falling back to `level` when `RUST_LOG` is unset
pub fn init_tracing_with_level(level: LogLevel) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
