//! Named worker threads.
//!
//! Every long-lived thread in the daemon (the control runtime, the console
//! reader, per-channel sensor transactions) is spawned through here so it
//! carries a name in panics and logs and an explicit stack size.

use std::io;
use std::thread::{Builder, JoinHandle};

/// Spawn a named thread with a `stack_kb` KiB stack.
pub fn spawn_worker<T, F>(name: &str, stack_kb: usize, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    log::debug!("Spawning '{}' (stack={}KB)", name, stack_kb);
    Builder::new()
        .name(name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
}
