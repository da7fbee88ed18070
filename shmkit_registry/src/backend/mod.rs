//! OS backends for the two resource kinds.
//!
//! Both kinds share one contract, [`Backend`]: resolve a request to a
//! registry key, open or create and map the resource, and later detach or
//! destroy it. The coordinator drives every kind through the same generic
//! path; only the OS calls differ.

pub mod posix;
pub mod sysv;

use crate::error::ShmResult;
use crate::handle::{ResourceHandle, ResourceKey};

pub use posix::{PosixBackend, PosixMapping, PosixRequest};
pub use sysv::{SysvAttachment, SysvBackend, SysvRequest};

/// How failures on the destroy path are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupMode {
    /// Any failed step aborts the operation and is returned to the caller
    Strict,
    /// Failed detach/stat steps are logged and the path continues;
    /// used by sweeps and exit-time cleanup
    BestEffort,
}

/// Result of a detach request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachStatus {
    /// The OS resource was removed
    Destroyed,
    /// Detached from this mapping; the resource stays alive.
    ///
    /// System-V reports the attaches left (other processes plus this
    /// process's remaining local attaches); POSIX always reports 1.
    Detached {
        /// Attachments still holding the resource
        remaining: u64,
    },
    /// Neither tracked nor known to the OS
    NotFound,
}

impl DetachStatus {
    /// Numeric result: `0` destroyed, `>0` remaining attaches, `-1` not found.
    pub fn code(self) -> i64 {
        match self {
            Self::Destroyed => 0,
            Self::Detached { remaining } => remaining as i64,
            Self::NotFound => -1,
        }
    }

    /// True if the OS resource was removed.
    pub fn is_destroyed(self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

/// Per-kind OS operations.
pub trait Backend: Copy {
    /// Parameters of an open/create request
    type Request;

    /// Outcome of resolving a request against the OS namespace
    type Resolved;

    /// Map a request to the resource it names.
    ///
    /// `Ok(None)` means the resource is absent (does not exist, already
    /// exists under an exclusive request, or is scheduled for deletion).
    fn resolve(&self, request: &Self::Request) -> ShmResult<Option<Self::Resolved>>;

    /// Registry key of a resolved request.
    fn key_of(&self, resolved: &Self::Resolved) -> ResourceKey;

    /// Whether a request must fail when the resource is already tracked.
    fn is_exclusive(&self, request: &Self::Request) -> bool;

    /// Open or create the resolved resource and map it.
    fn open_or_create(
        &self,
        request: &Self::Request,
        resolved: Self::Resolved,
    ) -> ShmResult<Option<ResourceHandle>>;

    /// Unmap `handle` and destroy the OS resource when nothing else holds it
    /// or `force` is set.
    fn destroy_or_detach(
        &self,
        handle: &mut ResourceHandle,
        force: bool,
        mode: CleanupMode,
    ) -> ShmResult<DetachStatus>;

    /// Attaches reported after one local attach of a mapped, multiply
    /// attached handle is released.
    fn remaining_after_local_detach(&self, handle: &ResourceHandle) -> ShmResult<u64>;

    /// Destroy a resource this process does not track.
    fn destroy_foreign(&self, key: &ResourceKey) -> ShmResult<DetachStatus>;
}
