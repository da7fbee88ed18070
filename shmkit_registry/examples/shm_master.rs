//! Creates a System-V segment under a random key and holds it for a while.
//!
//! Run `shm_slave <key>` in another terminal to read it.

use shmkit_registry::{ElementType, ExitHook, ShmManager, ShmResult, init_tracing};
use std::thread;
use std::time::Duration;

fn main() -> ShmResult<()> {
    init_tracing();
    ExitHook::install_signal_handler()?;

    let manager = ShmManager::new();
    let Some((key, view)) = manager.create(10, ElementType::Int32, None, None)? else {
        eprintln!("No free System-V key found");
        return Ok(());
    };

    println!("key: {key} (0x{key:x})");
    println!("cmd: ipcs -m | grep 0x{key:08x}");

    if let Some(values) = unsafe { view.as_mut_slice::<i32>() } {
        values[0] = 11;
        values[1] = 22;
        println!("{} {} {}", values[0], values[1], values[2]);
    }

    thread::sleep(Duration::from_secs(30));

    let status = manager.detach(key as i32, false)?;
    println!("detach: {}", status.code());
    Ok(())
}
