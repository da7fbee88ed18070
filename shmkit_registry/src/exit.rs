//! Process-exit cleanup
//!
//! Managers register a weak reference here. A `libc::atexit` trampoline,
//! installed once, sweeps every live registered coordinator with
//! [`CleanupMode::BestEffort`] so OS resources do not outlive the process.
//! Nothing in the exit path may panic across the FFI boundary or block on a
//! lock that a dying thread still holds.

use crate::backend::CleanupMode;
use crate::error::ShmResult;
use crate::lifecycle::{LifecycleCoordinator, SweepReport};
use crate::manager::ShmManager;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, LazyLock, Once, Weak};
use std::time::Duration;
use tracing::{info, warn};

type Target = Weak<Mutex<LifecycleCoordinator>>;

static TARGETS: LazyLock<Mutex<Vec<Target>>> = LazyLock::new(|| Mutex::new(Vec::new()));
static ATEXIT: Once = Once::new();

/// Exit status used after a termination signal.
const SIGNAL_EXIT_STATUS: i32 = 130;

const LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Register `coordinator` for exit-time cleanup, installing the `atexit`
/// trampoline on first use.
pub(crate) fn register(coordinator: &Arc<Mutex<LifecycleCoordinator>>) {
    ATEXIT.call_once(|| {
        if unsafe { libc::atexit(run_at_exit) } != 0 {
            warn!("atexit registration failed, exit cleanup disabled");
        }
    });
    let mut targets = TARGETS.lock();
    targets.retain(|target| target.strong_count() > 0);
    targets.push(Arc::downgrade(coordinator));
}

extern "C" fn run_at_exit() {
    let _ = panic::catch_unwind(AssertUnwindSafe(sweep_registered));
}

/// Sweep every registered coordinator that is still alive.
pub fn sweep_registered() -> SweepReport {
    let Some(mut targets) = TARGETS.try_lock_for(LOCK_TIMEOUT) else {
        return SweepReport::default();
    };
    let pending: Vec<Target> = targets.drain(..).collect();
    drop(targets);

    let mut total = SweepReport::default();
    for target in pending {
        if let Some(coordinator) = target.upgrade() {
            let report = sweep_target(&coordinator);
            total.destroyed += report.destroyed;
            total.failed += report.failed;
        }
    }
    total
}

fn sweep_target(coordinator: &Mutex<LifecycleCoordinator>) -> SweepReport {
    match coordinator.try_lock_for(LOCK_TIMEOUT) {
        Some(mut guard) => guard.sweep(CleanupMode::BestEffort),
        None => {
            warn!("coordinator still locked at exit, skipping sweep");
            SweepReport::default()
        }
    }
}

/// Scoped exit cleanup for one manager.
///
/// Installing registers the manager with the process exit hook; dropping
/// the returned value sweeps the manager immediately.
#[derive(Debug)]
#[must_use = "dropping the hook sweeps the manager immediately"]
pub struct ExitHook {
    target: Target,
}

impl ExitHook {
    /// Register `manager` and return its guard.
    pub fn install(manager: &ShmManager) -> Self {
        register(manager.coordinator());
        Self {
            target: Arc::downgrade(manager.coordinator()),
        }
    }

    /// Sweep every registered manager on SIGINT/SIGTERM, then exit with
    /// status 130.
    pub fn install_signal_handler() -> ShmResult<()> {
        ctrlc::set_handler(|| {
            let report = sweep_registered();
            info!(
                destroyed = report.destroyed,
                failed = report.failed,
                "termination signal, shared memory released"
            );
            std::process::exit(SIGNAL_EXIT_STATUS);
        })?;
        Ok(())
    }

    /// Sweep the manager now.
    pub fn run(&self) -> SweepReport {
        match self.target.upgrade() {
            Some(coordinator) => sweep_target(&coordinator),
            None => SweepReport::default(),
        }
    }
}

impl Drop for ExitHook {
    fn drop(&mut self) {
        let _ = panic::catch_unwind(AssertUnwindSafe(|| self.run()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PosixRequest;
    use crate::config::RegistryConfig;
    use shmkit::shm::element::ElementType;

    #[test]
    fn hook_sweeps_on_drop() {
        let manager = ShmManager::with_config(RegistryConfig {
            cleanup_on_exit: false,
            ..RegistryConfig::default()
        })
        .unwrap();
        let name = format!("/shmkit-exit-hook-{}", std::process::id());
        let _ = manager.destroy_posix(&name);

        {
            let _hook = ExitHook::install(&manager);
            manager
                .get_named(&PosixRequest::create(&name, 4, ElementType::Uint8, 0o600))
                .unwrap()
                .unwrap();
            assert_eq!(manager.lock().len(), 1);
        }

        assert!(manager.lock().is_empty());
        assert_eq!(manager.total_allocated_size(), 0);
        assert!(!manager.destroy_posix(&name).unwrap());
    }

    #[test]
    fn dead_targets_are_skipped() {
        let manager = ShmManager::new();
        let hook = ExitHook::install(&manager);
        drop(manager);
        assert_eq!(hook.run(), SweepReport::default());
    }
}
