//! Process-local table of tracked resources.
//!
//! A single ordered container of [`ResourceHandle`] records. At most one
//! handle exists per [`ResourceKey`]; callers check with [`Registry::find`]
//! before [`Registry::insert`]. Sweeps iterate over a key snapshot so
//! entries can be removed while the sweep is in progress.

use crate::handle::{HandleInfo, ResourceHandle, ResourceKey};

/// Ordered collection of live resource handles.
#[derive(Debug, Default)]
pub struct Registry {
    handles: Vec<ResourceHandle>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle tracked under `key`, mapped or not.
    pub fn find(&self, key: &ResourceKey) -> Option<&ResourceHandle> {
        self.handles.iter().find(|handle| handle.matches(key))
    }

    /// Mutable handle tracked under `key`.
    pub fn find_mut(&mut self, key: &ResourceKey) -> Option<&mut ResourceHandle> {
        self.handles.iter_mut().find(|handle| handle.matches(key))
    }

    /// True if `key` is tracked.
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.find(key).is_some()
    }

    /// Append `handle` and return its index.
    ///
    /// # Panics
    ///
    /// If a handle with the same key is already tracked.
    pub fn insert(&mut self, handle: ResourceHandle) -> usize {
        let key = handle.key();
        assert!(!self.contains(&key), "{key} is already registered");
        self.handles.push(handle);
        self.handles.len() - 1
    }

    /// Remove the handle tracked under `key`. Returns whether it was found.
    pub fn remove(&mut self, key: &ResourceKey) -> bool {
        self.take(key).is_some()
    }

    /// Remove and return the handle tracked under `key`.
    pub fn take(&mut self, key: &ResourceKey) -> Option<ResourceHandle> {
        let index = self.handles.iter().position(|handle| handle.matches(key))?;
        Some(self.handles.remove(index))
    }

    /// Keys of every tracked handle, in insertion order.
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.handles.iter().map(ResourceHandle::key).collect()
    }

    /// Iterate over tracked handles.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.handles.iter()
    }

    /// Number of tracked handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Serializable summary of every tracked handle.
    pub fn snapshot(&self) -> Vec<HandleInfo> {
        self.handles.iter().map(ResourceHandle::info).collect()
    }
}
