//! Free memory reported in pings and status reports

use std::sync::Mutex;
use sysinfo::System;

/// Closure for `MeshNode::with_memory_probe`.
///
/// Reports available system memory in bytes, saturating at `u32::MAX`.
pub fn available_memory_probe() -> impl Fn() -> u32 + Send + 'static {
    let system = Mutex::new(System::new());
    move || match system.lock() {
        Ok(mut system) => {
            system.refresh_memory();
            saturate(system.available_memory())
        }
        Err(_) => 0,
    }
}

fn saturate(bytes: u64) -> u32 {
    u32::try_from(bytes).unwrap_or(u32::MAX)
}
