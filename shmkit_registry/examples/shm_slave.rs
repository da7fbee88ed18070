//! Opens the segment created by `shm_master` and prints its first values.

use shmkit_registry::{ElementType, ExitHook, ShmManager, ShmResult, init_tracing};
use std::thread;
use std::time::Duration;

fn main() -> ShmResult<()> {
    init_tracing();
    ExitHook::install_signal_handler()?;

    let Some(key) = std::env::args().nth(1).and_then(|arg| parse_key(&arg)) else {
        eprintln!("usage: shm_slave <key>   (decimal or 0x-prefixed hex)");
        return Ok(());
    };

    let manager = ShmManager::new();
    let Some(view) = manager.open(key, ElementType::Int32)? else {
        eprintln!("Segment {key} not found, is shm_master running?");
        return Ok(());
    };

    if let Some(values) = unsafe { view.as_slice::<i32>() } {
        println!("{} {} {}", values[0], values[1], values[2]);
    }

    thread::sleep(Duration::from_secs(30));

    let status = manager.detach(key as i32, false)?;
    println!("detach: {}", status.code());
    Ok(())
}

fn parse_key(arg: &str) -> Option<u32> {
    match arg.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => arg.parse().ok(),
    }
}
