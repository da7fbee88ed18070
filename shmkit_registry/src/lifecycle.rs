//! Lifecycle coordination across both backends
//!
//! [`LifecycleCoordinator`] owns the [`Registry`] and the aggregate byte
//! counters. Every request is resolved through the matching backend, then
//! recorded in (or matched against) the registry. A handle leaves the
//! registry only when its OS resource is destroyed.

use crate::backend::{
    Backend, CleanupMode, DetachStatus, PosixBackend, PosixRequest, SysvBackend, SysvRequest,
};
use crate::error::{ShmError, ShmResult};
use crate::handle::{HandleInfo, ResourceHandle, ResourceKey, ResourceKind, ViewDescriptor};
use crate::registry::Registry;
use serde::Serialize;
use shmkit::shm::consts::IPC_PRIVATE;
use tracing::{debug, info, warn};

/// Aggregate byte counters of one coordinator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Logical view bytes of every tracked handle
    pub allocated: usize,
    /// Bytes currently mapped into this process
    pub mapped: usize,
}

impl Counters {
    fn add_allocated(&mut self, bytes: usize) {
        self.allocated += bytes;
    }

    fn sub_allocated(&mut self, bytes: usize) {
        self.allocated = checked_release("allocated", self.allocated, bytes);
    }

    fn add_mapped(&mut self, bytes: usize) {
        self.mapped += bytes;
    }

    fn sub_mapped(&mut self, bytes: usize) {
        self.mapped = checked_release("mapped", self.mapped, bytes);
    }
}

fn checked_release(counter: &'static str, current: usize, bytes: usize) -> usize {
    current.checked_sub(bytes).unwrap_or_else(|| {
        warn!(counter, current, bytes, "counter underflow clamped to zero");
        0
    })
}

/// Outcome of a registry sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Resources removed at the OS level
    pub destroyed: usize,
    /// Entries whose destroy step failed (logged, entry dropped anyway)
    pub failed: usize,
}

/// Top-level API over the registry and both backends.
#[derive(Debug, Default)]
pub struct LifecycleCoordinator {
    registry: Registry,
    counters: Counters,
    sysv: SysvBackend,
    posix: PosixBackend,
}

impl LifecycleCoordinator {
    /// Coordinator with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or open a System-V segment and map it.
    ///
    /// Returns `None` when the segment is absent. A segment already mapped
    /// by this coordinator is not attached again: the existing view is
    /// returned and its local attach count goes up.
    pub fn get(&mut self, request: &SysvRequest) -> ShmResult<Option<ViewDescriptor>> {
        self.acquire(self.sysv, request)
    }

    /// Create or open a POSIX object and map it. Same contract as
    /// [`LifecycleCoordinator::get`].
    pub fn get_named(&mut self, request: &PosixRequest) -> ShmResult<Option<ViewDescriptor>> {
        self.acquire(self.posix, request)
    }

    /// Detach the System-V segment with `key`.
    ///
    /// An untracked segment is only touched when `force` is set.
    pub fn detach(&mut self, key: i32, force: bool) -> ShmResult<DetachStatus> {
        let tracked = self
            .registry
            .iter()
            .find(|handle| handle.sysv_key() == Some(key))
            .map(ResourceHandle::key);

        let target = if key == IPC_PRIVATE {
            // shmget would create a fresh segment for the private key.
            tracked
        } else {
            match self.sysv.lookup(key)? {
                Some(shmid) => Some(ResourceKey::SystemV(shmid)),
                None => tracked,
            }
        };

        match target {
            Some(resource) => self.release(self.sysv, &resource, force, CleanupMode::Strict),
            None => {
                debug!(key, "detach of unknown System-V key");
                Ok(DetachStatus::NotFound)
            }
        }
    }

    /// Detach the POSIX object `name`.
    pub fn detach_named(&mut self, name: &str, force: bool) -> ShmResult<DetachStatus> {
        let key = ResourceKey::Posix(name.to_string());
        self.release(self.posix, &key, force, CleanupMode::Strict)
    }

    /// Detach the resource identified by a registry key.
    pub fn detach_key(&mut self, key: &ResourceKey, force: bool) -> ShmResult<DetachStatus> {
        match key.kind() {
            ResourceKind::SystemV => self.release(self.sysv, key, force, CleanupMode::Strict),
            ResourceKind::Posix => self.release(self.posix, key, force, CleanupMode::Strict),
        }
    }

    /// Force-destroy every tracked resource and return how many were
    /// destroyed. Individual failures are logged and skipped.
    pub fn detach_all(&mut self) -> usize {
        self.sweep(CleanupMode::BestEffort).destroyed
    }

    /// Force-destroy every tracked resource.
    ///
    /// Every entry leaves the registry whatever its outcome; with
    /// [`CleanupMode::Strict`] a failing step is counted in
    /// [`SweepReport::failed`] instead of being skipped over.
    pub fn sweep(&mut self, mode: CleanupMode) -> SweepReport {
        let mut report = SweepReport::default();

        for key in self.registry.keys() {
            let Some(mut handle) = self.registry.take(&key) else {
                continue;
            };
            let mapped = handle.mapped_size();
            let outcome = match key.kind() {
                ResourceKind::SystemV => self.sysv.destroy_or_detach(&mut handle, true, mode),
                ResourceKind::Posix => self.posix.destroy_or_detach(&mut handle, true, mode),
            };
            self.counters.sub_allocated(handle.logical_bytes());
            // Anything still mapped is released when the handle drops.
            self.counters.sub_mapped(mapped);
            drop(handle);

            match outcome {
                Ok(DetachStatus::Destroyed) => report.destroyed += 1,
                Ok(status) => debug!(key = %key, code = status.code(), "sweep left resource in place"),
                Err(err) => {
                    report.failed += 1;
                    warn!(key = %key, error = %err, "sweep failed to destroy resource");
                }
            }
        }

        if report.destroyed > 0 || report.failed > 0 {
            info!(
                destroyed = report.destroyed,
                failed = report.failed,
                "registry swept"
            );
        }
        report
    }

    /// Sweep best-effort, leaving the coordinator empty.
    pub fn shutdown(&mut self) -> SweepReport {
        self.sweep(CleanupMode::BestEffort)
    }

    /// Logical bytes of every tracked handle.
    pub fn total_allocated_size(&self) -> usize {
        self.counters.allocated
    }

    /// Bytes currently mapped.
    pub fn total_mapped_size(&self) -> usize {
        self.counters.mapped
    }

    /// Both counters.
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Tracked handle for `key`.
    pub fn handle(&self, key: &ResourceKey) -> Option<&ResourceHandle> {
        self.registry.find(key)
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of tracked handles.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Serializable summary of every tracked handle.
    pub fn snapshot(&self) -> Vec<HandleInfo> {
        self.registry.snapshot()
    }

    /// [`LifecycleCoordinator::snapshot`] rendered as JSON.
    pub fn snapshot_json(&self) -> ShmResult<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    fn acquire<B: Backend>(
        &mut self,
        backend: B,
        request: &B::Request,
    ) -> ShmResult<Option<ViewDescriptor>> {
        let Some(resolved) = backend.resolve(request)? else {
            return Ok(None);
        };
        let key = backend.key_of(&resolved);

        if let Some(handle) = self.registry.find_mut(&key) {
            if backend.is_exclusive(request) {
                debug!(key = %key, "exclusive request for a tracked resource");
                return Ok(None);
            }
            if handle.is_mapped() {
                let attaches = handle.add_local_attach();
                debug!(key = %key, attaches, "reusing tracked mapping");
                return Ok(handle.view());
            }

            let Some(fresh) = backend.open_or_create(request, resolved)? else {
                return Ok(None);
            };
            self.counters.sub_allocated(handle.logical_bytes());
            self.counters.add_allocated(fresh.logical_bytes());
            self.counters.add_mapped(fresh.mapped_size());
            handle.adopt(fresh);
            debug!(key = %key, "remapped tracked resource");
            return Ok(handle.view());
        }

        let Some(handle) = backend.open_or_create(request, resolved)? else {
            return Ok(None);
        };
        self.counters.add_allocated(handle.logical_bytes());
        self.counters.add_mapped(handle.mapped_size());
        let view = handle.view();
        self.registry.insert(handle);
        Ok(view)
    }

    fn release<B: Backend>(
        &mut self,
        backend: B,
        key: &ResourceKey,
        force: bool,
        mode: CleanupMode,
    ) -> ShmResult<DetachStatus> {
        let Some(handle) = self.registry.find_mut(key) else {
            if !force {
                debug!(key = %key, "detach of untracked resource without force");
                return Ok(DetachStatus::NotFound);
            }
            return backend.destroy_foreign(key);
        };

        if !force && handle.is_mapped() && handle.local_attaches() > 1 {
            let remaining = backend.remaining_after_local_detach(handle)?;
            let attaches = handle.release_local_attach();
            debug!(key = %key, attaches, remaining, "released local attach");
            return Ok(DetachStatus::Detached { remaining });
        }

        let mapped = handle.mapped_size();
        let outcome = backend.destroy_or_detach(handle, force, mode);
        debug_assert!(
            !matches!(outcome, Err(ShmError::StaleHandle { .. })),
            "{key} was not mapped at its tracked address"
        );
        if !handle.is_mapped() {
            self.counters.sub_mapped(mapped);
        }
        let status = outcome?;

        if status.is_destroyed() {
            if let Some(removed) = self.registry.take(key) {
                self.counters.sub_allocated(removed.logical_bytes());
            }
        }
        Ok(status)
    }
}

impl Drop for LifecycleCoordinator {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            self.sweep(CleanupMode::BestEffort);
        }
    }
}
