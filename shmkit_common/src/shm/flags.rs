//! Typed flag sets for System-V and POSIX shared memory calls.
//!
//! The flag words are passed through to the OS unchanged; unknown bits are
//! retained so callers can combine them with permission bits or with flags
//! this crate does not name.

use bitflags::bitflags;

bitflags! {
    /// Flags for `shmget`. The low nine bits carry the permission mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SysvCreateFlags: i32 {
        /// Create the segment if it does not exist
        const CREATE = libc::IPC_CREAT;
        /// Fail if the segment already exists
        const EXCLUSIVE = libc::IPC_EXCL;
    }
}

impl SysvCreateFlags {
    /// Flags used to create a new, exclusive segment with `permissions`.
    pub fn create_exclusive(permissions: u32) -> Self {
        (Self::CREATE | Self::EXCLUSIVE).with_permissions(permissions)
    }

    /// Merge permission bits (`0o777` mask) into the flag word.
    pub fn with_permissions(self, permissions: u32) -> Self {
        Self::from_bits_retain(self.bits() | (permissions & 0o777) as i32)
    }

    /// Permission bits carried by the flag word.
    pub fn permissions(self) -> u32 {
        (self.bits() & 0o777) as u32
    }
}

bitflags! {
    /// Flags for `shmat`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SysvAttachFlags: i32 {
        /// Attach read-only
        const READ_ONLY = libc::SHM_RDONLY;
        /// Round the attach address down to `SHMLBA`
        const ROUND = libc::SHM_RND;
    }
}

bitflags! {
    /// Flags for `shm_open`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PosixOpenFlags: i32 {
        /// Open for reading and writing
        const READ_WRITE = libc::O_RDWR;
        /// Create the object if it does not exist
        const CREATE = libc::O_CREAT;
        /// Fail if the object already exists
        const EXCLUSIVE = libc::O_EXCL;
        /// Truncate an existing object to zero length
        const TRUNCATE = libc::O_TRUNC;
    }
}

impl PosixOpenFlags {
    /// `O_CREAT | O_RDWR | O_EXCL`.
    pub fn create_exclusive() -> Self {
        Self::CREATE | Self::READ_WRITE | Self::EXCLUSIVE
    }
}

bitflags! {
    /// Flags for `mmap` of a POSIX object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: i32 {
        /// Share the mapping with other processes
        const SHARED = libc::MAP_SHARED;
        /// Private copy-on-write mapping
        const PRIVATE = libc::MAP_PRIVATE;
        /// Mapping not backed by the object (rarely useful here)
        const ANONYMOUS = libc::MAP_ANONYMOUS;
    }
}

/// Parse an octal permission string such as `"660"` or `"0644"`.
///
/// Returns `None` for empty or non-octal input and for values above `0o7777`.
pub fn parse_permissions(value: &str) -> Option<u32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    u32::from_str_radix(trimmed, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_are_retained() {
        let flags = SysvCreateFlags::create_exclusive(0o660);
        assert!(flags.contains(SysvCreateFlags::CREATE));
        assert!(flags.contains(SysvCreateFlags::EXCLUSIVE));
        assert_eq!(flags.permissions(), 0o660);
        assert_eq!(flags.bits(), libc::IPC_CREAT | libc::IPC_EXCL | 0o660);
    }

    #[test]
    fn permission_mask_drops_high_bits() {
        let flags = SysvCreateFlags::empty().with_permissions(0o7777);
        assert_eq!(flags.permissions(), 0o777);
        assert!(!flags.contains(SysvCreateFlags::CREATE));
    }

    #[test]
    fn posix_create_exclusive() {
        let flags = PosixOpenFlags::create_exclusive();
        assert_eq!(flags.bits(), libc::O_CREAT | libc::O_RDWR | libc::O_EXCL);
    }

    #[test]
    fn parse_octal_permissions() {
        assert_eq!(parse_permissions("660"), Some(0o660));
        assert_eq!(parse_permissions("0644"), Some(0o644));
        assert_eq!(parse_permissions(" 600 "), Some(0o600));
        assert_eq!(parse_permissions("abc"), None);
        assert_eq!(parse_permissions("999"), None);
        assert_eq!(parse_permissions(""), None);
        assert_eq!(parse_permissions("17777"), None);
    }
}
