//! System-V shared memory segments (`shmget` / `shmat` / `shmdt` / `shmctl`).

use super::{Backend, CleanupMode, DetachStatus};
use crate::error::{ShmError, ShmResult};
use crate::handle::{ResourceHandle, ResourceKey};
use nix::errno::Errno;
use shmkit::shm::element::ElementType;
use shmkit::shm::flags::{SysvAttachFlags, SysvCreateFlags};
use std::ffi::c_void;
use std::ptr::NonNull;
use tracing::{debug, info, warn};

/// Parameters of a System-V `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysvRequest {
    /// Segment key (`IPC_PRIVATE` for a fresh anonymous segment)
    pub key: i32,
    /// Requested element count; `0` opens an existing segment
    pub element_count: usize,
    /// `shmget` flags and permission bits
    pub create_flags: SysvCreateFlags,
    /// `shmat` flags
    pub attach_flags: SysvAttachFlags,
    /// View element type
    pub element_type: ElementType,
}

impl SysvRequest {
    /// Open the existing segment `key` as a view of `element_type`.
    pub fn open(key: i32, element_type: ElementType) -> Self {
        Self {
            key,
            element_count: 0,
            create_flags: SysvCreateFlags::empty(),
            attach_flags: SysvAttachFlags::empty(),
            element_type,
        }
    }

    /// Create segment `key` holding `element_count` elements.
    pub fn create(
        key: i32,
        element_count: usize,
        element_type: ElementType,
        permissions: u32,
    ) -> Self {
        Self {
            key,
            element_count,
            create_flags: SysvCreateFlags::create_exclusive(permissions),
            attach_flags: SysvAttachFlags::empty(),
            element_type,
        }
    }

    /// Replace the `shmget` flags.
    pub fn with_create_flags(mut self, flags: SysvCreateFlags) -> Self {
        self.create_flags = flags;
        self
    }

    /// Replace the `shmat` flags.
    pub fn with_attach_flags(mut self, flags: SysvAttachFlags) -> Self {
        self.attach_flags = flags;
        self
    }
}

/// A resolved segment, not yet attached.
#[derive(Debug, Clone, Copy)]
pub struct SysvResolved {
    shmid: i32,
    byte_size: usize,
    created: bool,
}

/// One `shmat` attachment. Dropping it detaches (errors ignored).
#[derive(Debug)]
pub struct SysvAttachment {
    addr: NonNull<c_void>,
    len: usize,
}

// SAFETY: the attachment is the sole owner of its address range.
unsafe impl Send for SysvAttachment {}

impl SysvAttachment {
    /// Attach address.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.addr.cast()
    }

    /// Segment size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-sized attachment.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Detach, reporting the `shmdt` error.
    pub fn detach(self) -> Result<(), Errno> {
        let addr = self.addr;
        std::mem::forget(self);
        Errno::result(unsafe { libc::shmdt(addr.as_ptr()) }).map(drop)
    }
}

impl Drop for SysvAttachment {
    fn drop(&mut self) {
        unsafe {
            libc::shmdt(self.addr.as_ptr());
        }
    }
}

/// System-V backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysvBackend;

impl SysvBackend {
    /// Identifier of the existing segment `key`, `None` if it does not
    /// exist or is scheduled for deletion.
    pub fn lookup(&self, key: i32) -> ShmResult<Option<i32>> {
        match shmget(key, 0, 0) {
            Ok(shmid) => Ok(Some(shmid)),
            Err(Errno::ENOENT | Errno::EIDRM) => Ok(None),
            Err(errno) => Err(ShmError::os("shmget", errno)),
        }
    }

    /// Kernel attach count of `shmid`.
    pub fn attach_count(&self, shmid: i32) -> ShmResult<u64> {
        stat(shmid)
            .map(|ds| ds.shm_nattch as u64)
            .map_err(|errno| ShmError::os("shmctl(IPC_STAT)", errno))
    }

    fn attach(
        &self,
        shmid: i32,
        flags: SysvAttachFlags,
        len: usize,
    ) -> Result<SysvAttachment, Errno> {
        let addr = unsafe { libc::shmat(shmid, std::ptr::null(), flags.bits()) };
        if addr as isize == -1 {
            return Err(Errno::last());
        }
        NonNull::new(addr)
            .map(|addr| SysvAttachment { addr, len })
            .ok_or(Errno::EINVAL)
    }
}

impl Backend for SysvBackend {
    type Request = SysvRequest;
    type Resolved = SysvResolved;

    fn resolve(&self, request: &SysvRequest) -> ShmResult<Option<SysvResolved>> {
        let width = request.element_type.width();
        let requested = request.element_type.byte_len(request.element_count).ok_or_else(|| {
            ShmError::out_of_range(
                "shmget",
                format!("{} elements overflow the address space", request.element_count),
            )
        })?;
        let flags = request.create_flags;

        let attempt = if flags.contains(SysvCreateFlags::CREATE)
            && !flags.contains(SysvCreateFlags::EXCLUSIVE)
            && request.element_count > 0
        {
            // Probe exclusively first so ownership is known exactly.
            match shmget(request.key, requested, (flags | SysvCreateFlags::EXCLUSIVE).bits()) {
                Ok(shmid) => Ok((shmid, true)),
                Err(Errno::EEXIST) => shmget(request.key, requested, flags.bits()).map(|id| (id, false)),
                Err(errno) => Err(errno),
            }
        } else {
            let created = flags.contains(SysvCreateFlags::CREATE) && request.element_count > 0;
            shmget(request.key, requested, flags.bits()).map(|id| (id, created))
        };

        let (shmid, created) = match attempt {
            Ok(found) => found,
            Err(Errno::EEXIST | Errno::EIDRM | Errno::ENOENT) => {
                debug!(key = request.key, "System-V segment absent");
                return Ok(None);
            }
            Err(Errno::EINVAL) => {
                return Err(ShmError::out_of_range(
                    "shmget",
                    format!("{requested} bytes outside SHMMIN..SHMMAX or larger than segment"),
                ));
            }
            Err(errno) => return Err(ShmError::os("shmget", errno)),
        };

        let byte_size = if request.element_count == 0 {
            let ds = stat(shmid).map_err(|errno| ShmError::os("shmctl(IPC_STAT)", errno))?;
            // Whole elements only.
            (ds.shm_segsz as usize / width) * width
        } else {
            requested
        };

        Ok(Some(SysvResolved {
            shmid,
            byte_size,
            created,
        }))
    }

    fn key_of(&self, resolved: &SysvResolved) -> ResourceKey {
        ResourceKey::SystemV(resolved.shmid)
    }

    fn is_exclusive(&self, request: &SysvRequest) -> bool {
        request
            .create_flags
            .contains(SysvCreateFlags::CREATE | SysvCreateFlags::EXCLUSIVE)
    }

    fn open_or_create(
        &self,
        request: &SysvRequest,
        resolved: SysvResolved,
    ) -> ShmResult<Option<ResourceHandle>> {
        let attached = self.attach(resolved.shmid, request.attach_flags, resolved.byte_size);
        let attachment = match attached {
            Ok(attachment) => attachment,
            Err(errno) => {
                if resolved.created {
                    // Nobody else can know a segment we just created.
                    let _ = remove(resolved.shmid);
                }
                return Err(ShmError::os("shmat", errno));
            }
        };

        info!(
            key = request.key,
            shmid = resolved.shmid,
            bytes = resolved.byte_size,
            created = resolved.created,
            "System-V segment attached"
        );

        Ok(Some(ResourceHandle::system_v(
            request.key,
            resolved.shmid,
            attachment,
            request.element_type.count_for(resolved.byte_size),
            request.element_type,
            resolved.created,
        )))
    }

    fn destroy_or_detach(
        &self,
        handle: &mut ResourceHandle,
        force: bool,
        mode: CleanupMode,
    ) -> ShmResult<DetachStatus> {
        let key = handle.key();
        let ResourceKey::SystemV(shmid) = key else {
            return Ok(DetachStatus::NotFound);
        };

        if let Some(attachment) = handle.take_sysv_attachment() {
            handle.on_unmapped();
            if let Err(errno) = attachment.detach() {
                match (mode, errno) {
                    (CleanupMode::Strict, Errno::EINVAL) => {
                        return Err(ShmError::StaleHandle {
                            key: key.to_string(),
                        });
                    }
                    (CleanupMode::Strict, errno) => return Err(ShmError::os("shmdt", errno)),
                    (CleanupMode::BestEffort, errno) => {
                        warn!(shmid, error = %errno, "shmdt failed during cleanup");
                    }
                }
            }
        }

        let nattch = match stat(shmid) {
            Ok(ds) => ds.shm_nattch as u64,
            Err(Errno::EINVAL | Errno::EIDRM) => {
                // Removed by another process once the last attach went away.
                debug!(shmid, "System-V segment already gone");
                return Ok(DetachStatus::Destroyed);
            }
            Err(errno) => match mode {
                CleanupMode::Strict => return Err(ShmError::os("shmctl(IPC_STAT)", errno)),
                CleanupMode::BestEffort => {
                    warn!(shmid, error = %errno, "IPC_STAT failed during cleanup");
                    0
                }
            },
        };

        if force || nattch == 0 {
            match remove(shmid) {
                Ok(()) | Err(Errno::EINVAL | Errno::EIDRM) => {
                    info!(shmid, forced = force, "System-V segment destroyed");
                    Ok(DetachStatus::Destroyed)
                }
                Err(errno) => Err(ShmError::os("shmctl(IPC_RMID)", errno)),
            }
        } else {
            debug!(shmid, remaining = nattch, "System-V segment detached");
            Ok(DetachStatus::Detached { remaining: nattch })
        }
    }

    fn remaining_after_local_detach(&self, handle: &ResourceHandle) -> ShmResult<u64> {
        let ResourceKey::SystemV(shmid) = handle.key() else {
            return Ok(0);
        };
        // The kernel counts this process's shared mapping once.
        let others = self.attach_count(shmid)?.saturating_sub(1);
        Ok(others + handle.local_attaches().saturating_sub(1) as u64)
    }

    fn destroy_foreign(&self, key: &ResourceKey) -> ShmResult<DetachStatus> {
        let ResourceKey::SystemV(shmid) = *key else {
            return Ok(DetachStatus::NotFound);
        };
        match remove(shmid) {
            Ok(()) => {
                info!(shmid, "untracked System-V segment destroyed");
                Ok(DetachStatus::Destroyed)
            }
            Err(Errno::EINVAL | Errno::EIDRM) => Ok(DetachStatus::NotFound),
            Err(errno) => Err(ShmError::os("shmctl(IPC_RMID)", errno)),
        }
    }
}

fn shmget(key: i32, size: usize, flags: i32) -> Result<i32, Errno> {
    Errno::result(unsafe { libc::shmget(key, size, flags) })
}

fn stat(shmid: i32) -> Result<libc::shmid_ds, Errno> {
    let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
    Errno::result(unsafe { libc::shmctl(shmid, libc::IPC_STAT, &mut ds) })?;
    Ok(ds)
}

fn remove(shmid: i32) -> Result<(), Errno> {
    Errno::result(unsafe { libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut()) }).map(drop)
}
