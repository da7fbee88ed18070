//! POSIX shared memory objects (`shm_open` / `mmap` / `shm_unlink`).
//!
//! Every object created here starts with an 8-byte header holding the
//! logical byte size of the view. The kernel only knows the page-rounded
//! object size, so an opener that passes an element count of zero reads the
//! header to recover the exact count the creator asked for. The view handed
//! out starts right after the header.

use super::{Backend, CleanupMode, DetachStatus};
use crate::error::{ShmError, ShmResult};
use crate::handle::{ResourceHandle, ResourceKey};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{self, ProtFlags};
use nix::sys::stat::Mode;
use shmkit::shm::consts::SIZE_HEADER_LEN;
use shmkit::shm::element::ElementType;
use shmkit::shm::flags::{MapFlags, PosixOpenFlags};
use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use tracing::{debug, info, warn};

/// Parameters of a POSIX `get_named`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixRequest {
    /// Object name, e.g. `/frames`
    pub name: String,
    /// Requested element count; `0` opens an existing object
    pub element_count: usize,
    /// `shm_open` flags
    pub open_flags: PosixOpenFlags,
    /// Permission bits used when the object is created
    pub mode: u32,
    /// `mmap` flags
    pub map_flags: MapFlags,
    /// View element type
    pub element_type: ElementType,
}

impl PosixRequest {
    /// Open the existing object `name` read/write as a shared mapping.
    pub fn open(name: impl Into<String>, element_type: ElementType) -> Self {
        Self {
            name: name.into(),
            element_count: 0,
            open_flags: PosixOpenFlags::READ_WRITE,
            mode: 0,
            map_flags: MapFlags::SHARED,
            element_type,
        }
    }

    /// Create object `name` holding `element_count` elements.
    pub fn create(
        name: impl Into<String>,
        element_count: usize,
        element_type: ElementType,
        mode: u32,
    ) -> Self {
        Self {
            name: name.into(),
            element_count,
            open_flags: PosixOpenFlags::create_exclusive(),
            mode,
            map_flags: MapFlags::SHARED,
            element_type,
        }
    }

    /// Replace the `shm_open` flags.
    pub fn with_open_flags(mut self, flags: PosixOpenFlags) -> Self {
        self.open_flags = flags;
        self
    }

    /// Replace the `mmap` flags.
    pub fn with_map_flags(mut self, flags: MapFlags) -> Self {
        self.map_flags = flags;
        self
    }
}

/// A validated request. The object is not touched until it is opened, so
/// a tracked name can be recognised before any OS call.
#[derive(Debug, Clone)]
pub struct PosixResolved {
    name: String,
    logical_bytes: usize,
}

/// One `mmap` of a POSIX object, header included. Dropping it unmaps.
#[derive(Debug)]
pub struct PosixMapping {
    base: NonNull<c_void>,
    len: usize,
}

// See `SysvAttachment`.
unsafe impl Send for PosixMapping {}

impl PosixMapping {
    /// Start of the view, just past the size header.
    pub fn view_ptr(&self) -> NonNull<u8> {
        // In bounds: a mapping is never shorter than the header.
        unsafe { self.base.cast::<u8>().add(SIZE_HEADER_LEN) }
    }

    /// Mapped length in bytes, header included.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a mapping with no room past the header.
    pub fn is_empty(&self) -> bool {
        self.len <= SIZE_HEADER_LEN
    }

    /// Logical size stored in the header.
    pub fn logical_size(&self) -> u64 {
        unsafe { self.base.cast::<u64>().as_ptr().read_volatile() }
    }

    fn write_logical_size(&self, bytes: u64) {
        unsafe { self.base.cast::<u64>().as_ptr().write_volatile(bytes) }
    }

    /// View size recovered from the header, falling back to the mapped
    /// length when the header is zero or larger than the mapping.
    fn recovered_size(&self) -> usize {
        let capacity = self.len - SIZE_HEADER_LEN;
        match usize::try_from(self.logical_size()) {
            Ok(bytes) if bytes > 0 && bytes <= capacity => bytes,
            _ => capacity,
        }
    }

    /// Unmap, reporting the `munmap` error.
    pub fn unmap(self) -> Result<(), Errno> {
        let (base, len) = (self.base, self.len);
        std::mem::forget(self);
        unsafe { mman::munmap(base, len) }
    }
}

impl Drop for PosixMapping {
    fn drop(&mut self) {
        let _ = unsafe { mman::munmap(self.base, self.len) };
    }
}

/// POSIX backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixBackend;

impl PosixBackend {
    /// Remove `name` from the namespace. Existing mappings stay valid.
    pub fn unlink(&self, name: &str) -> ShmResult<bool> {
        match mman::shm_unlink(name) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(Errno::ENAMETOOLONG) => Err(name_too_long(name)),
            Err(errno) => Err(ShmError::os("shm_unlink", errno)),
        }
    }

    /// Open `name`, creating it exclusively first when the request would
    /// create without `O_EXCL`, so ownership is known exactly.
    fn open_object(&self, request: &PosixRequest) -> ShmResult<Option<(File, bool)>> {
        let flags = request.open_flags;
        let mode = Mode::from_bits_truncate(request.mode as libc::mode_t);
        let creating = flags.contains(PosixOpenFlags::CREATE) && request.element_count > 0;

        let attempt = if creating && !flags.contains(PosixOpenFlags::EXCLUSIVE) {
            let exclusive = OFlag::from_bits_retain((flags | PosixOpenFlags::EXCLUSIVE).bits());
            match mman::shm_open(request.name.as_str(), exclusive, mode) {
                Ok(fd) => Ok((fd, true)),
                Err(Errno::EEXIST) => {
                    mman::shm_open(request.name.as_str(), OFlag::from_bits_retain(flags.bits()), mode)
                        .map(|fd| (fd, false))
                }
                Err(errno) => Err(errno),
            }
        } else {
            mman::shm_open(request.name.as_str(), OFlag::from_bits_retain(flags.bits()), mode)
                .map(|fd| (fd, creating))
        };

        match attempt {
            Ok((fd, created)) => Ok(Some((File::from(fd), created))),
            Err(Errno::EEXIST | Errno::ENOENT) => {
                debug!(name = %request.name, "POSIX object absent");
                Ok(None)
            }
            Err(Errno::ENAMETOOLONG) => Err(name_too_long(&request.name)),
            Err(errno) => Err(ShmError::os("shm_open", errno)),
        }
    }

    /// Unlink an object we created but failed to set up.
    fn abandon(&self, name: &str, created: bool) {
        if created {
            let _ = mman::shm_unlink(name);
        }
    }
}

impl Backend for PosixBackend {
    type Request = PosixRequest;
    type Resolved = PosixResolved;

    fn resolve(&self, request: &PosixRequest) -> ShmResult<Option<PosixResolved>> {
        if request.name.is_empty() {
            return Err(ShmError::out_of_range("shm_open", "empty object name"));
        }
        let logical_bytes = request
            .element_type
            .byte_len(request.element_count)
            .filter(|bytes| bytes.checked_add(SIZE_HEADER_LEN).is_some())
            .ok_or_else(|| {
                ShmError::out_of_range(
                    "ftruncate",
                    format!("{} elements overflow the address space", request.element_count),
                )
            })?;
        Ok(Some(PosixResolved {
            name: request.name.clone(),
            logical_bytes,
        }))
    }

    fn key_of(&self, resolved: &PosixResolved) -> ResourceKey {
        ResourceKey::Posix(resolved.name.clone())
    }

    fn is_exclusive(&self, request: &PosixRequest) -> bool {
        request
            .open_flags
            .contains(PosixOpenFlags::CREATE | PosixOpenFlags::EXCLUSIVE)
    }

    fn open_or_create(
        &self,
        request: &PosixRequest,
        resolved: PosixResolved,
    ) -> ShmResult<Option<ResourceHandle>> {
        let Some((file, created)) = self.open_object(request)? else {
            return Ok(None);
        };
        let name = request.name.as_str();

        let mut resized = false;
        let map_len = if request.element_count > 0 {
            let total = (resolved.logical_bytes + SIZE_HEADER_LEN) as u64;
            let current = file.metadata()?.len();
            // Never shrink an object somebody else may have mapped.
            if created || current < total {
                if let Err(err) = file.set_len(total) {
                    self.abandon(name, created);
                    return Err(ShmError::os("ftruncate", io_errno(&err)));
                }
                resized = true;
            }
            total.max(current) as usize
        } else {
            file.metadata()?.len() as usize
        };

        if map_len < SIZE_HEADER_LEN {
            self.abandon(name, created);
            return Err(ShmError::out_of_range(
                "mmap",
                format!("{name} is {map_len} bytes, too small for the size header"),
            ));
        }
        let Some(length) = NonZeroUsize::new(map_len) else {
            return Err(ShmError::out_of_range("mmap", "zero-length object"));
        };

        let base = match unsafe {
            mman::mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                mman::MapFlags::from_bits_retain(request.map_flags.bits()),
                &file,
                0,
            )
        } {
            Ok(base) => base,
            Err(errno) => {
                self.abandon(name, created);
                return Err(ShmError::os("mmap", errno));
            }
        };
        // The descriptor is not needed once mapped.
        drop(file);

        let mapping = PosixMapping { base, len: map_len };
        // The header belongs to whoever sized the object.
        let logical = if resized {
            mapping.write_logical_size(resolved.logical_bytes as u64);
            resolved.logical_bytes
        } else {
            mapping.recovered_size()
        };
        let element_count = request.element_type.count_for(logical);

        info!(
            name = %name,
            bytes = map_len,
            elements = element_count,
            created,
            "POSIX object mapped"
        );

        Ok(Some(ResourceHandle::posix(
            request.name.clone(),
            mapping,
            element_count,
            request.element_type,
            created,
        )))
    }

    fn destroy_or_detach(
        &self,
        handle: &mut ResourceHandle,
        force: bool,
        mode: CleanupMode,
    ) -> ShmResult<DetachStatus> {
        let ResourceKey::Posix(name) = handle.key() else {
            return Ok(DetachStatus::NotFound);
        };

        if let Some(mapping) = handle.take_posix_mapping() {
            handle.on_unmapped();
            if let Err(errno) = mapping.unmap() {
                match (mode, errno) {
                    (CleanupMode::Strict, Errno::EINVAL) => {
                        return Err(ShmError::StaleHandle {
                            key: handle.key().to_string(),
                        });
                    }
                    (CleanupMode::Strict, errno) => return Err(ShmError::os("munmap", errno)),
                    (CleanupMode::BestEffort, errno) => {
                        warn!(name = %name, error = %errno, "munmap failed during cleanup");
                    }
                }
            }
        }

        if !force {
            debug!(name = %name, "POSIX object unmapped, left in place");
            return Ok(DetachStatus::Detached { remaining: 1 });
        }

        let existed = self.unlink(&name)?;
        info!(name = %name, existed, "POSIX object unlinked");
        Ok(DetachStatus::Destroyed)
    }

    fn remaining_after_local_detach(&self, _handle: &ResourceHandle) -> ShmResult<u64> {
        Ok(1)
    }

    fn destroy_foreign(&self, key: &ResourceKey) -> ShmResult<DetachStatus> {
        let ResourceKey::Posix(name) = key else {
            return Ok(DetachStatus::NotFound);
        };
        if self.unlink(name)? {
            info!(name = %name, "untracked POSIX object unlinked");
            Ok(DetachStatus::Destroyed)
        } else {
            Ok(DetachStatus::NotFound)
        }
    }
}

fn name_too_long(name: &str) -> ShmError {
    ShmError::out_of_range("shm_open", format!("name of {} bytes is too long", name.len()))
}

fn io_errno(err: &std::io::Error) -> Errno {
    Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO))
}
