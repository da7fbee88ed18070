//! SHM (Shared Memory) constants.
//!
//! Raw OS flag values exported for callers that build flag words by hand,
//! plus the limits the registry enforces. These are the single source of
//! truth - other crates import from here rather than from `libc` directly.

use static_assertions::const_assert_eq;

/// Key requesting a fresh, unnamed System-V segment.
pub const IPC_PRIVATE: i32 = libc::IPC_PRIVATE;

/// `shmget` flag: create the segment if it does not exist.
pub const IPC_CREAT: i32 = libc::IPC_CREAT;

/// `shmget` flag: fail if the segment already exists (with `IPC_CREAT`).
pub const IPC_EXCL: i32 = libc::IPC_EXCL;

/// `shmat` flag: attach read-only.
pub const SHM_RDONLY: i32 = libc::SHM_RDONLY;

/// `shmat` flag: round the attach address down to `SHMLBA`.
pub const SHM_RND: i32 = libc::SHM_RND;

/// `shm_open` flag: create the object if it does not exist.
pub const O_CREAT: i32 = libc::O_CREAT;

/// `shm_open` flag: fail if the object already exists (with `O_CREAT`).
pub const O_EXCL: i32 = libc::O_EXCL;

/// `shm_open` flag: open for reading and writing.
pub const O_RDWR: i32 = libc::O_RDWR;

/// `shm_open` flag: open read-only.
pub const O_RDONLY: i32 = libc::O_RDONLY;

/// `shm_open` flag: truncate an existing object to zero length.
pub const O_TRUNC: i32 = libc::O_TRUNC;

/// `mmap` flag: share the mapping with other processes.
pub const MAP_SHARED: i32 = libc::MAP_SHARED;

/// `mmap` flag: private copy-on-write mapping.
pub const MAP_PRIVATE: i32 = libc::MAP_PRIVATE;

/// `mmap` flag: mapping not backed by any object.
pub const MAP_ANONYMOUS: i32 = libc::MAP_ANONYMOUS;

/// Smallest System-V key accepted by the convenience API.
pub const KEY_MIN: u32 = 1;

/// Largest System-V key accepted by the convenience API.
pub const KEY_MAX: u32 = u32::MAX - KEY_MIN;

/// Maximum element count of a single view (count of elements, not bytes).
///
/// 2^31 - 1, the largest length a typed view over one mapping may carry.
pub const LENGTH_MAX: usize = i32::MAX as usize;

/// Permissions used when the caller supplies none (`rw-rw----`).
pub const DEFAULT_PERMISSIONS: u32 = 0o660;

/// Width of the logical-size header at offset 0 of every POSIX object.
///
/// The header holds the creator's requested byte size as a native-endian
/// `u64`; the view handed to callers starts right after it.
pub const SIZE_HEADER_LEN: usize = 8;

const_assert_eq!(SIZE_HEADER_LEN, core::mem::size_of::<u64>());
