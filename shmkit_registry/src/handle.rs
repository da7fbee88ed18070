//! Resource handles and view descriptors
//!
//! A [`ResourceHandle`] is the process-local record of one live shared
//! memory resource. Its payload is a tagged [`Resource`]: System-V segments
//! carry a key and kernel identifier, POSIX objects carry a name. The
//! mapping lives inside the payload, so a handle is mapped exactly when its
//! mapping is present.

use crate::backend::{PosixMapping, SysvAttachment};
use serde::Serialize;
use shmkit::shm::element::{Element, ElementType};
use std::fmt;
use std::ptr::NonNull;

/// Kind of an OS shared memory resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    /// Key/identifier based System-V segment
    SystemV,
    /// Name/descriptor based POSIX object
    Posix,
}

/// Identity of a tracked resource: `(kind, shmid | name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKey {
    /// System-V segment, identified by its kernel `shmid`
    SystemV(i32),
    /// POSIX object, identified by its name
    Posix(String),
}

impl ResourceKey {
    /// Kind of the keyed resource.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::SystemV(_) => ResourceKind::SystemV,
            Self::Posix(_) => ResourceKind::Posix,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SystemV(shmid) => write!(f, "sysv:{shmid}"),
            Self::Posix(name) => write!(f, "posix:{name}"),
        }
    }
}

/// Kind-specific payload of a handle.
#[derive(Debug)]
pub enum Resource {
    /// System-V segment
    SystemV {
        /// Key the segment was requested with
        key: i32,
        /// Kernel identifier
        shmid: i32,
        /// Present while attached
        attachment: Option<SysvAttachment>,
    },
    /// POSIX shared memory object
    Posix {
        /// Object name
        name: String,
        /// Present while mapped
        mapping: Option<PosixMapping>,
    },
}

/// One live shared memory resource tracked by this process.
#[derive(Debug)]
pub struct ResourceHandle {
    resource: Resource,
    region_size: usize,
    element_count: usize,
    element_type: ElementType,
    is_owner: bool,
    local_attaches: usize,
}

impl ResourceHandle {
    /// Handle for a freshly attached System-V segment.
    pub fn system_v(
        key: i32,
        shmid: i32,
        attachment: SysvAttachment,
        element_count: usize,
        element_type: ElementType,
        is_owner: bool,
    ) -> Self {
        Self {
            region_size: attachment.len(),
            resource: Resource::SystemV {
                key,
                shmid,
                attachment: Some(attachment),
            },
            element_count,
            element_type,
            is_owner,
            local_attaches: 1,
        }
    }

    /// Handle for a freshly mapped POSIX object.
    pub fn posix(
        name: String,
        mapping: PosixMapping,
        element_count: usize,
        element_type: ElementType,
        is_owner: bool,
    ) -> Self {
        Self {
            region_size: mapping.len(),
            resource: Resource::Posix {
                name,
                mapping: Some(mapping),
            },
            element_count,
            element_type,
            is_owner,
            local_attaches: 1,
        }
    }

    /// Registry key.
    pub fn key(&self) -> ResourceKey {
        match &self.resource {
            Resource::SystemV { shmid, .. } => ResourceKey::SystemV(*shmid),
            Resource::Posix { name, .. } => ResourceKey::Posix(name.clone()),
        }
    }

    /// True if this handle is identified by `key`.
    pub fn matches(&self, key: &ResourceKey) -> bool {
        match (&self.resource, key) {
            (Resource::SystemV { shmid, .. }, ResourceKey::SystemV(id)) => shmid == id,
            (Resource::Posix { name, .. }, ResourceKey::Posix(other)) => name == other,
            _ => false,
        }
    }

    /// Resource kind.
    pub fn kind(&self) -> ResourceKind {
        match self.resource {
            Resource::SystemV { .. } => ResourceKind::SystemV,
            Resource::Posix { .. } => ResourceKind::Posix,
        }
    }

    /// Kind-specific payload.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// System-V key, if this is a System-V handle.
    pub fn sysv_key(&self) -> Option<i32> {
        match self.resource {
            Resource::SystemV { key, .. } => Some(key),
            Resource::Posix { .. } => None,
        }
    }

    /// Start of the caller-visible view, `None` while detached.
    pub fn address(&self) -> Option<NonNull<u8>> {
        match &self.resource {
            Resource::SystemV { attachment, .. } => attachment.as_ref().map(|a| a.as_ptr()),
            Resource::Posix { mapping, .. } => mapping.as_ref().map(|m| m.view_ptr()),
        }
    }

    /// True while the resource is mapped into this process.
    pub fn is_mapped(&self) -> bool {
        self.address().is_some()
    }

    /// Bytes currently mapped, including the POSIX size header.
    pub fn mapped_size(&self) -> usize {
        if self.is_mapped() { self.region_size } else { 0 }
    }

    /// Logical view size in bytes (`element_count * width`).
    pub fn logical_bytes(&self) -> usize {
        self.element_count * self.element_type.width()
    }

    /// Element count of the view.
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Element type of the view.
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// True if this process created the resource.
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Number of `get` calls currently sharing the mapping.
    pub fn local_attaches(&self) -> usize {
        self.local_attaches
    }

    /// View descriptor of the current mapping.
    pub fn view(&self) -> Option<ViewDescriptor> {
        self.address().map(|address| ViewDescriptor {
            key: self.key(),
            address,
            element_count: self.element_count,
            element_type: self.element_type,
        })
    }

    /// Serializable summary.
    pub fn info(&self) -> HandleInfo {
        let (key, name, shmid) = match &self.resource {
            Resource::SystemV { key, shmid, .. } => (Some(*key), None, Some(*shmid)),
            Resource::Posix { name, .. } => (None, Some(name.clone()), None),
        };
        HandleInfo {
            kind: self.kind(),
            key,
            shmid,
            name,
            mapped: self.is_mapped(),
            mapped_size: self.mapped_size(),
            element_count: self.element_count,
            element_type: self.element_type,
            is_owner: self.is_owner,
            local_attaches: self.local_attaches,
        }
    }

    pub(crate) fn add_local_attach(&mut self) -> usize {
        self.local_attaches += 1;
        self.local_attaches
    }

    pub(crate) fn release_local_attach(&mut self) -> usize {
        self.local_attaches = self.local_attaches.saturating_sub(1);
        self.local_attaches
    }

    pub(crate) fn take_sysv_attachment(&mut self) -> Option<SysvAttachment> {
        match &mut self.resource {
            Resource::SystemV { attachment, .. } => attachment.take(),
            Resource::Posix { .. } => None,
        }
    }

    pub(crate) fn take_posix_mapping(&mut self) -> Option<PosixMapping> {
        match &mut self.resource {
            Resource::Posix { mapping, .. } => mapping.take(),
            Resource::SystemV { .. } => None,
        }
    }

    pub(crate) fn on_unmapped(&mut self) {
        self.local_attaches = 0;
    }

    /// Move the mapping of a freshly reopened handle for the same resource
    /// into this one. The view parameters follow the new mapping.
    pub(crate) fn adopt(&mut self, fresh: ResourceHandle) {
        debug_assert!(fresh.matches(&self.key()));
        debug_assert!(!self.is_mapped());
        self.region_size = fresh.region_size;
        self.element_count = fresh.element_count;
        self.element_type = fresh.element_type;
        self.local_attaches = 1;
        match (&mut self.resource, fresh.resource) {
            (
                Resource::SystemV { attachment, .. },
                Resource::SystemV {
                    attachment: fresh_attachment,
                    ..
                },
            ) => *attachment = fresh_attachment,
            (
                Resource::Posix { mapping, .. },
                Resource::Posix {
                    mapping: fresh_mapping,
                    ..
                },
            ) => *mapping = fresh_mapping,
            _ => {}
        }
    }
}

/// Address, element count and element type of a mapped view.
///
/// Handed to the buffer-wrapping collaborator, which builds a zero-copy
/// typed view and calls back into `detach` with [`ViewDescriptor::key`]
/// once its view is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDescriptor {
    key: ResourceKey,
    address: NonNull<u8>,
    element_count: usize,
    element_type: ElementType,
}

// SAFETY: plain data; dereferencing the address is already unsafe.
unsafe impl Send for ViewDescriptor {}
unsafe impl Sync for ViewDescriptor {}

impl ViewDescriptor {
    /// Resource the view belongs to.
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Base address of the view.
    pub fn address(&self) -> NonNull<u8> {
        self.address
    }

    /// Number of elements.
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Element type.
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// View length in bytes.
    pub fn byte_len(&self) -> usize {
        self.element_count * self.element_type.width()
    }

    /// Typed view of the mapped elements.
    ///
    /// Returns `None` if `T` cannot represent the view's element type.
    ///
    /// # Safety
    ///
    /// The resource must still be mapped, and no other reference (in this
    /// or another process) may write the region for the lifetime of the
    /// returned slice.
    pub unsafe fn as_slice<T: Element>(&self) -> Option<&[T]> {
        if !T::TYPES.contains(&self.element_type) {
            return None;
        }
        Some(unsafe {
            std::slice::from_raw_parts(self.address.as_ptr().cast::<T>(), self.element_count)
        })
    }

    /// Mutable typed view of the mapped elements.
    ///
    /// Returns `None` if `T` cannot represent the view's element type.
    ///
    /// # Safety
    ///
    /// Same as [`ViewDescriptor::as_slice`], and the mapping must be
    /// writable (not attached read-only).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice<T: Element>(&self) -> Option<&mut [T]> {
        if !T::TYPES.contains(&self.element_type) {
            return None;
        }
        Some(unsafe {
            std::slice::from_raw_parts_mut(self.address.as_ptr().cast::<T>(), self.element_count)
        })
    }
}

/// Serializable snapshot of one tracked handle.
#[derive(Debug, Clone, Serialize)]
pub struct HandleInfo {
    /// Resource kind
    pub kind: ResourceKind,
    /// System-V key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<i32>,
    /// System-V identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shmid: Option<i32>,
    /// POSIX name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Currently mapped in this process
    pub mapped: bool,
    /// Bytes currently mapped
    pub mapped_size: usize,
    /// Element count of the view
    pub element_count: usize,
    /// Element type of the view
    pub element_type: ElementType,
    /// Created (rather than opened) by this process
    pub is_owner: bool,
    /// Local `get` calls sharing the mapping
    pub local_attaches: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_identity_and_display() {
        let a = ResourceKey::SystemV(42);
        let b = ResourceKey::Posix("/frames".to_string());
        assert_eq!(a.kind(), ResourceKind::SystemV);
        assert_eq!(b.kind(), ResourceKind::Posix);
        assert_eq!(a.to_string(), "sysv:42");
        assert_eq!(b.to_string(), "posix:/frames");
        assert_ne!(a, ResourceKey::SystemV(43));
    }

    #[test]
    fn typed_slice_rejects_mismatched_width() {
        let mut backing = [0.0f64; 4];
        let view = ViewDescriptor {
            key: ResourceKey::SystemV(1),
            address: NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap(),
            element_count: 4,
            element_type: ElementType::Float64,
        };
        assert_eq!(view.byte_len(), 32);
        unsafe {
            assert!(view.as_slice::<f32>().is_none());
            let values = view.as_mut_slice::<f64>().unwrap();
            values[2] = 1.5;
            assert_eq!(view.as_slice::<f64>().unwrap()[2], 1.5);
        }
        assert_eq!(backing[2], 1.5);
    }
}
