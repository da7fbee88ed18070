//! Registry and lifecycle behaviour against the real OS

use shmkit_registry::{
    DetachStatus, ElementType, LifecycleCoordinator, PosixBackend, PosixOpenFlags, PosixRequest,
    RegistryConfig, ResourceKey, ShmManager, ShmResult, SysvBackend, SysvCreateFlags, SysvRequest,
};
use std::thread;

fn test_key(slot: i32) -> i32 {
    0x5a00_0000 | ((std::process::id() as i32 & 0xffff) << 8) | slot
}

fn test_name(tag: &str) -> String {
    format!("/shmkit-it-{tag}-{}", std::process::id())
}

fn clear_key(key: i32) {
    let _ = LifecycleCoordinator::new().detach(key, true);
}

#[test]
fn test_at_most_one_handle_across_threads() -> ShmResult<()> {
    let key = test_key(0x01);
    clear_key(key);
    let manager = ShmManager::with_config(RegistryConfig {
        cleanup_on_exit: false,
        ..RegistryConfig::default()
    })?;

    let request = SysvRequest::create(key, 64, ElementType::Uint8, 0o600)
        .with_create_flags(SysvCreateFlags::CREATE.with_permissions(0o600));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            thread::spawn(move || manager.get(&request))
        })
        .collect();

    let mut addresses = Vec::new();
    for worker in workers {
        let view = worker.join().unwrap()?.expect("segment available");
        addresses.push(view.address());
    }

    assert!(addresses.windows(2).all(|pair| pair[0] == pair[1]));
    {
        let coordinator = manager.lock();
        assert_eq!(coordinator.len(), 1);
        let handle = coordinator.registry().iter().next().unwrap();
        assert_eq!(handle.local_attaches(), 8);
        assert_eq!(handle.sysv_key(), Some(key));
    }

    assert_eq!(manager.detach(key, true)?, DetachStatus::Destroyed);
    assert!(manager.lock().is_empty());
    Ok(())
}

#[test]
fn test_posix_size_recovery() -> ShmResult<()> {
    let name = test_name("recovery");
    let _ = PosixBackend.unlink(&name);

    let mut creator = LifecycleCoordinator::new();
    let created = creator
        .get_named(&PosixRequest::create(&name, 100, ElementType::Float64, 0o600))?
        .expect("created");
    assert_eq!(created.element_count(), 100);
    unsafe {
        created.as_mut_slice::<f64>().unwrap()[99] = 42.5;
    }

    let mut opener = LifecycleCoordinator::new();
    let opened = opener
        .get_named(&PosixRequest::open(&name, ElementType::Float64))?
        .expect("opened");
    assert_eq!(opened.element_count(), 100);
    assert_eq!(unsafe { opened.as_slice::<f64>().unwrap()[99] }, 42.5);

    assert_eq!(opener.detach_named(&name, false)?.code(), 1);
    assert_eq!(creator.detach_named(&name, true)?.code(), 0);
    Ok(())
}

#[test]
fn test_non_creating_opener_keeps_size_header() -> ShmResult<()> {
    let name = test_name("header");
    let _ = PosixBackend.unlink(&name);

    let mut creator = LifecycleCoordinator::new();
    creator
        .get_named(&PosixRequest::create(&name, 100, ElementType::Float64, 0o600))?
        .expect("created");

    // Create-if-missing with a smaller count attaches to the existing object.
    let mut second = LifecycleCoordinator::new();
    let shared = second
        .get_named(
            &PosixRequest::create(&name, 10, ElementType::Float64, 0o600)
                .with_open_flags(PosixOpenFlags::CREATE | PosixOpenFlags::READ_WRITE),
        )?
        .expect("opened");
    assert_eq!(shared.element_count(), 100);
    assert!(!second.handle(shared.key()).unwrap().is_owner());

    let mut third = LifecycleCoordinator::new();
    let reopened = third
        .get_named(&PosixRequest::open(&name, ElementType::Float64))?
        .expect("opened");
    assert_eq!(reopened.element_count(), 100);

    assert_eq!(creator.detach_named(&name, true)?, DetachStatus::Destroyed);
    Ok(())
}

#[test]
fn test_reference_count_sequence() -> ShmResult<()> {
    let key = test_key(0x02);
    clear_key(key);
    let mut coordinator = LifecycleCoordinator::new();

    coordinator
        .get(&SysvRequest::create(key, 16, ElementType::Int32, 0o600))?
        .expect("created");
    for _ in 0..2 {
        coordinator
            .get(&SysvRequest::open(key, ElementType::Int32))?
            .expect("opened");
    }
    assert_eq!(coordinator.len(), 1);

    assert_eq!(coordinator.detach(key, false)?.code(), 2);
    assert!(SysvBackend.lookup(key)?.is_some());
    assert_eq!(coordinator.detach(key, false)?.code(), 1);
    assert!(SysvBackend.lookup(key)?.is_some());
    assert_eq!(coordinator.detach(key, false)?.code(), 0);
    assert!(SysvBackend.lookup(key)?.is_none());
    assert!(coordinator.is_empty());
    Ok(())
}

#[test]
fn test_force_destroy_ignores_other_attaches() -> ShmResult<()> {
    let key = test_key(0x03);
    clear_key(key);
    let mut owner = LifecycleCoordinator::new();
    let mut peer = LifecycleCoordinator::new();

    owner
        .get(&SysvRequest::create(key, 8, ElementType::Float32, 0o600))?
        .expect("created");
    peer.get(&SysvRequest::open(key, ElementType::Float32))?
        .expect("opened");

    assert_eq!(owner.detach(key, true)?, DetachStatus::Destroyed);
    assert!(owner.is_empty());
    assert!(owner.get(&SysvRequest::open(key, ElementType::Float32))?.is_none());

    // The peer still tracks the removed segment and can let go of it.
    assert_eq!(peer.detach(key, false)?, DetachStatus::Destroyed);
    assert!(peer.is_empty());
    Ok(())
}

#[test]
fn test_aggregate_counters() -> ShmResult<()> {
    let key = test_key(0x04);
    let name = test_name("counters");
    clear_key(key);
    let _ = PosixBackend.unlink(&name);
    let mut coordinator = LifecycleCoordinator::new();

    coordinator
        .get(&SysvRequest::create(key, 100, ElementType::Float32, 0o600))?
        .expect("created");
    assert_eq!(coordinator.total_allocated_size(), 400);
    assert_eq!(coordinator.total_mapped_size(), 400);

    coordinator
        .get_named(&PosixRequest::create(&name, 50, ElementType::Int16, 0o600))?
        .expect("created");
    assert_eq!(coordinator.total_allocated_size(), 500);
    assert_eq!(coordinator.total_mapped_size(), 400 + 100 + 8);

    coordinator.detach_named(&name, false)?;
    assert_eq!(coordinator.total_allocated_size(), 500);
    assert_eq!(coordinator.total_mapped_size(), 400);

    assert_eq!(coordinator.detach_all(), 2);
    assert_eq!(coordinator.total_allocated_size(), 0);
    assert_eq!(coordinator.total_mapped_size(), 0);
    assert!(!PosixBackend.unlink(&name)?);
    Ok(())
}

#[test]
fn test_end_to_end_fixed_key() -> ShmResult<()> {
    let key = 0x1234;
    clear_key(key);
    let mut coordinator = LifecycleCoordinator::new();

    let view = coordinator
        .get(&SysvRequest::create(key, 256, ElementType::Float64, 0o600))?
        .expect("created");
    assert_eq!(view.element_count(), 256);
    assert_eq!(view.element_type(), ElementType::Float64);
    assert_eq!(view.byte_len(), 2048);

    assert_eq!(coordinator.detach(key, false)?.code(), 0);
    assert!(coordinator.get(&SysvRequest::open(key, ElementType::Float64))?.is_none());
    Ok(())
}

#[test]
fn test_exclusive_create_of_tracked_key() -> ShmResult<()> {
    let key = test_key(0x05);
    clear_key(key);
    let mut coordinator = LifecycleCoordinator::new();
    let request = SysvRequest::create(key, 4, ElementType::Uint8, 0o600);

    let view = coordinator.get(&request)?.expect("created");
    assert!(coordinator.get(&request)?.is_none());
    assert_eq!(coordinator.len(), 1);

    let handle = coordinator.handle(view.key()).unwrap();
    assert!(handle.is_owner());
    assert!(matches!(view.key(), ResourceKey::SystemV(_)));
    assert_eq!(coordinator.detach_key(view.key(), true)?, DetachStatus::Destroyed);
    Ok(())
}

#[test]
fn test_unknown_resources_report_not_found() -> ShmResult<()> {
    let key = test_key(0x06);
    clear_key(key);
    let mut coordinator = LifecycleCoordinator::new();
    assert_eq!(coordinator.detach(key, false)?.code(), -1);
    assert_eq!(coordinator.detach(key, true)?.code(), -1);
    assert_eq!(coordinator.detach_named(&test_name("nothing"), true)?.code(), -1);
    Ok(())
}
