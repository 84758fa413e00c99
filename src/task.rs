//! Consumer task spawning.
//!
//! Wraps `esp_pthread_set_cfg()` so that `std::thread::spawn` creates a
//! FreeRTOS task with explicit priority and stack size. On non-ESP targets,
//! falls back to a plain named thread with the requested stack.
//!
//! ESP-IDF implements `std::thread` via pthreads, thin wrappers around
//! FreeRTOS tasks. `esp_pthread_set_cfg()` sets thread-local configuration
//! that applies to the *next* `pthread_create()` call from the calling
//! thread, so the config→spawn pair must not be interleaved with other
//! thread creation on the same thread.

use crate::error::{Error, Result};

/// Default consumer stack in bytes, enough for the dispatch loop plus a
/// typical subclass handler.
pub const DEFAULT_STACK_BYTES: usize = 4096;

/// Default FreeRTOS priority for consumer tasks (idle is 0).
pub const DEFAULT_PRIORITY: u8 = 5;

/// Stack and priority for one consumer task. Stack size is caller-tunable
/// to bound memory use per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    pub stack_bytes: usize,
    pub priority: u8,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            stack_bytes: DEFAULT_STACK_BYTES,
            priority: DEFAULT_PRIORITY,
        }
    }
}

/// Spawn a consumer task. The `name` parameter must be a null-terminated
/// string (e.g. `"edge-loop\0"`).
#[cfg(target_os = "espidf")]
pub(crate) fn spawn_consumer(
    name: &'static str,
    opts: TaskOptions,
    f: impl FnOnce() + Send + 'static,
) -> Result<std::thread::JoinHandle<()>> {
    // SAFETY: esp_pthread_set_cfg writes calling-thread-local state consumed
    // by the next pthread_create below; no other spawn interleaves here.
    unsafe {
        let mut cfg = esp_idf_svc::sys::esp_create_default_pthread_config();
        cfg.prio = opts.priority as i32;
        cfg.stack_size = opts.stack_bytes as i32;
        cfg.thread_name = name.as_ptr() as *const _;
        let ret = esp_idf_svc::sys::esp_pthread_set_cfg(&cfg);
        if ret != esp_idf_svc::sys::ESP_OK {
            log::error!("task: esp_pthread_set_cfg failed (rc={})", ret);
            return Err(Error::Spawn);
        }
    }

    let display_name = name.trim_end_matches('\0');
    log::info!(
        "task: spawning '{}' (pri={}, stack={}B)",
        display_name,
        opts.priority,
        opts.stack_bytes
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .spawn(f)
        .map_err(|_| Error::Spawn)
}

/// Simulation fallback — ignores priority, honours the stack request.
#[cfg(not(target_os = "espidf"))]
pub(crate) fn spawn_consumer(
    name: &'static str,
    opts: TaskOptions,
    f: impl FnOnce() + Send + 'static,
) -> Result<std::thread::JoinHandle<()>> {
    let display_name = name.trim_end_matches('\0');
    log::info!(
        "task(sim): spawning '{}' (stack={}B)",
        display_name,
        opts.stack_bytes
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .stack_size(opts.stack_bytes)
        .spawn(f)
        .map_err(|_| Error::Spawn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let opts = TaskOptions::default();
        assert!(opts.stack_bytes >= 2048);
        assert!(opts.priority > 0);
    }

    #[test]
    fn spawned_consumer_runs_and_joins() {
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = spawn_consumer("test-loop\0", TaskOptions::default(), move || {
            tx.send(7u8).unwrap();
        })
        .unwrap();
        assert_eq!(rx.recv().unwrap(), 7);
        handle.join().unwrap();
    }
}
