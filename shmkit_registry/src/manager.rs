//! Shared, thread-safe manager
//!
//! [`ShmManager`] wraps one [`LifecycleCoordinator`] behind a single
//! `parking_lot::Mutex`. Clones share the same registry, so concurrent
//! `get` calls from several threads still produce one handle per resource.
//! On top of the raw coordinator API it offers the create/open/destroy
//! helpers with range checks, random System-V keys and octal permission
//! strings.

use crate::backend::{DetachStatus, PosixRequest, SysvRequest};
use crate::config::{RegistryConfig, ShmConfig};
use crate::error::{ShmError, ShmResult};
use crate::exit;
use crate::handle::{HandleInfo, ResourceKey, ViewDescriptor};
use crate::lifecycle::{LifecycleCoordinator, SweepReport};
use parking_lot::{Mutex, MutexGuard};
use rand::Rng;
use shmkit::config::ConfigLoader;
use shmkit::shm::consts::{KEY_MAX, KEY_MIN};
use shmkit::shm::element::ElementType;
use shmkit::shm::flags::parse_permissions;
use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Cloneable handle to a mutex-guarded coordinator.
#[derive(Debug, Clone)]
pub struct ShmManager {
    inner: Arc<Mutex<LifecycleCoordinator>>,
    config: Arc<RegistryConfig>,
}

impl Default for ShmManager {
    fn default() -> Self {
        Self::build(RegistryConfig::default())
    }
}

impl ShmManager {
    /// Manager with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager with a validated configuration.
    pub fn with_config(config: RegistryConfig) -> ShmResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Load `[registry]` (and `[shared]`) settings from a TOML file.
    pub fn from_config_file(path: &Path) -> ShmResult<Self> {
        let config = ShmConfig::load(path)?;
        config.validate()?;
        Ok(Self::build(config.registry))
    }

    fn build(config: RegistryConfig) -> Self {
        let manager = Self {
            inner: Arc::new(Mutex::new(LifecycleCoordinator::new())),
            config: Arc::new(config),
        };
        if manager.config.cleanup_on_exit {
            exit::register(&manager.inner);
        }
        manager
    }

    /// Active configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Lock the coordinator.
    ///
    /// Dropping a [`ViewGuard`] of this manager while the guard is held
    /// deadlocks.
    pub fn lock(&self) -> MutexGuard<'_, LifecycleCoordinator> {
        self.inner.lock()
    }

    pub(crate) fn coordinator(&self) -> &Arc<Mutex<LifecycleCoordinator>> {
        &self.inner
    }

    /// See [`LifecycleCoordinator::get`].
    pub fn get(&self, request: &SysvRequest) -> ShmResult<Option<ViewDescriptor>> {
        self.lock().get(request)
    }

    /// See [`LifecycleCoordinator::get_named`].
    pub fn get_named(&self, request: &PosixRequest) -> ShmResult<Option<ViewDescriptor>> {
        self.lock().get_named(request)
    }

    /// See [`LifecycleCoordinator::detach`].
    pub fn detach(&self, key: i32, force: bool) -> ShmResult<DetachStatus> {
        self.lock().detach(key, force)
    }

    /// See [`LifecycleCoordinator::detach_named`].
    pub fn detach_named(&self, name: &str, force: bool) -> ShmResult<DetachStatus> {
        self.lock().detach_named(name, force)
    }

    /// See [`LifecycleCoordinator::detach_key`].
    pub fn detach_key(&self, key: &ResourceKey, force: bool) -> ShmResult<DetachStatus> {
        self.lock().detach_key(key, force)
    }

    /// See [`LifecycleCoordinator::detach_all`].
    pub fn detach_all(&self) -> usize {
        self.lock().detach_all()
    }

    /// See [`LifecycleCoordinator::shutdown`].
    pub fn shutdown(&self) -> SweepReport {
        self.lock().shutdown()
    }

    /// Logical bytes of every tracked handle.
    pub fn total_allocated_size(&self) -> usize {
        self.lock().total_allocated_size()
    }

    /// Bytes currently mapped.
    pub fn total_mapped_size(&self) -> usize {
        self.lock().total_mapped_size()
    }

    /// Serializable summary of every tracked handle.
    pub fn snapshot(&self) -> Vec<HandleInfo> {
        self.lock().snapshot()
    }

    /// Snapshot rendered as JSON.
    pub fn snapshot_json(&self) -> ShmResult<String> {
        self.lock().snapshot_json()
    }

    /// Create a System-V segment of `count` elements.
    ///
    /// Without a key, random keys are tried until one is free or
    /// `key_attempts` runs out. Returns the key actually used.
    pub fn create(
        &self,
        count: usize,
        element_type: ElementType,
        key: Option<u32>,
        permissions: Option<&str>,
    ) -> ShmResult<Option<(u32, ViewDescriptor)>> {
        self.check_count(count)?;
        let mode = self.permissions(permissions);

        if let Some(key) = key {
            check_key(key)?;
            let request = SysvRequest::create(key as i32, count, element_type, mode);
            return Ok(self.get(&request)?.map(|view| (key, view)));
        }

        let mut rng = rand::thread_rng();
        for _ in 0..self.config.key_attempts {
            let key = rng.gen_range(KEY_MIN..=KEY_MAX);
            let request = SysvRequest::create(key as i32, count, element_type, mode);
            if let Some(view) = self.get(&request)? {
                return Ok(Some((key, view)));
            }
            debug!(key, "random System-V key taken, retrying");
        }
        warn!(
            attempts = self.config.key_attempts,
            "no free System-V key found"
        );
        Ok(None)
    }

    /// Create POSIX object `name` of `count` elements.
    pub fn create_posix(
        &self,
        name: &str,
        count: usize,
        element_type: ElementType,
        permissions: Option<&str>,
    ) -> ShmResult<Option<ViewDescriptor>> {
        self.check_count(count)?;
        let request = PosixRequest::create(name, count, element_type, self.permissions(permissions));
        self.get_named(&request)
    }

    /// Open the existing System-V segment `key`.
    pub fn open(&self, key: u32, element_type: ElementType) -> ShmResult<Option<ViewDescriptor>> {
        check_key(key)?;
        self.get(&SysvRequest::open(key as i32, element_type))
    }

    /// Open the existing POSIX object `name`.
    pub fn open_posix(
        &self,
        name: &str,
        element_type: ElementType,
    ) -> ShmResult<Option<ViewDescriptor>> {
        self.get_named(&PosixRequest::open(name, element_type))
    }

    /// Force-destroy System-V segment `key`. True if it was destroyed.
    pub fn destroy(&self, key: u32) -> ShmResult<bool> {
        check_key(key)?;
        Ok(self.detach(key as i32, true)?.is_destroyed())
    }

    /// Force-destroy POSIX object `name`. True if it was destroyed.
    pub fn destroy_posix(&self, name: &str) -> ShmResult<bool> {
        Ok(self.detach_named(name, true)?.is_destroyed())
    }

    /// Tie `view` to a guard that detaches it (without force) on drop.
    pub fn guard(&self, view: ViewDescriptor) -> ViewGuard {
        ViewGuard {
            view,
            manager: Arc::downgrade(&self.inner),
        }
    }

    fn check_count(&self, count: usize) -> ShmResult<()> {
        if count == 0 || count > self.config.max_element_count {
            return Err(ShmError::out_of_range(
                "create",
                format!(
                    "element count {count} outside 1..={}",
                    self.config.max_element_count
                ),
            ));
        }
        Ok(())
    }

    fn permissions(&self, requested: Option<&str>) -> u32 {
        match requested {
            None => self.config.permissions(),
            Some(text) => parse_permissions(text).unwrap_or_else(|| {
                debug!(permissions = text, "unparsable permissions, using default");
                self.config.permissions()
            }),
        }
    }
}

fn check_key(key: u32) -> ShmResult<()> {
    if !(KEY_MIN..=KEY_MAX).contains(&key) {
        return Err(ShmError::out_of_range(
            "create",
            format!("key {key} outside {KEY_MIN}..={KEY_MAX}"),
        ));
    }
    Ok(())
}

/// A view that releases its attach when dropped.
///
/// The guard only holds a weak reference: the mapping itself stays owned
/// by the registry, and a guard outliving its manager does nothing.
#[derive(Debug)]
pub struct ViewGuard {
    view: ViewDescriptor,
    manager: Weak<Mutex<LifecycleCoordinator>>,
}

impl ViewGuard {
    /// Guarded view.
    pub fn view(&self) -> &ViewDescriptor {
        &self.view
    }

    /// Detach now and report the result.
    pub fn release(mut self) -> ShmResult<DetachStatus> {
        let manager = std::mem::take(&mut self.manager);
        match manager.upgrade() {
            Some(inner) => inner.lock().detach_key(self.view.key(), false),
            None => Ok(DetachStatus::NotFound),
        }
    }
}

impl Deref for ViewGuard {
    type Target = ViewDescriptor;

    fn deref(&self) -> &ViewDescriptor {
        &self.view
    }
}

impl Drop for ViewGuard {
    fn drop(&mut self) {
        let Some(inner) = self.manager.upgrade() else {
            return;
        };
        if let Err(err) = inner.lock().detach_key(self.view.key(), false) {
            warn!(key = %self.view.key(), error = %err, "view release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ShmManager {
        ShmManager::with_config(RegistryConfig {
            cleanup_on_exit: false,
            max_element_count: 1024,
            ..RegistryConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn rejects_out_of_range_arguments() {
        let manager = manager();
        let err = manager.create(0, ElementType::Uint8, Some(1), None).unwrap_err();
        assert!(err.is_range_error());
        let err = manager.create(2048, ElementType::Uint8, Some(1), None).unwrap_err();
        assert!(err.is_range_error());
        let err = manager.create(1, ElementType::Uint8, Some(0), None).unwrap_err();
        assert!(err.is_range_error());
        let err = manager.open(u32::MAX, ElementType::Uint8).unwrap_err();
        assert!(err.is_range_error());
    }

    #[test]
    fn permission_fallback() {
        let manager = manager();
        assert_eq!(manager.permissions(None), 0o660);
        assert_eq!(manager.permissions(Some("600")), 0o600);
        assert_eq!(manager.permissions(Some("not-octal")), 0o660);
    }

    #[test]
    fn random_key_create_and_destroy() {
        let manager = manager();
        let (key, view) = manager
            .create(32, ElementType::Int32, None, Some("600"))
            .unwrap()
            .expect("a free key");
        assert!((KEY_MIN..=KEY_MAX).contains(&key));
        assert_eq!(view.element_count(), 32);
        assert_eq!(manager.total_allocated_size(), 128);

        assert!(manager.destroy(key).unwrap());
        assert!(manager.open(key, ElementType::Int32).unwrap().is_none());
        assert_eq!(manager.total_allocated_size(), 0);
    }

    #[test]
    fn guard_releases_on_drop() {
        let manager = manager();
        let name = format!("/shmkit-guard-{}", std::process::id());
        let _ = manager.destroy_posix(&name);

        let view = manager
            .create_posix(&name, 10, ElementType::Uint16, None)
            .unwrap()
            .unwrap();
        let guard = manager.guard(view);
        assert_eq!(guard.element_count(), 10);
        assert!(manager.total_mapped_size() > 0);
        drop(guard);

        assert_eq!(manager.total_mapped_size(), 0);
        assert!(manager.destroy_posix(&name).unwrap());
    }

    #[test]
    fn guard_outliving_manager_is_inert() {
        let manager = manager();
        let name = format!("/shmkit-orphan-guard-{}", std::process::id());
        let _ = manager.destroy_posix(&name);
        let view = manager
            .create_posix(&name, 1, ElementType::Uint8, None)
            .unwrap()
            .unwrap();
        let guard = manager.guard(view);
        drop(manager);
        assert_eq!(guard.release().unwrap(), DetachStatus::NotFound);
    }
}
