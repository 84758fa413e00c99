//! Edge capture and debounce.
//!
//! A minimal ISR records the edge timestamp into an atomic and issues a
//! non-blocking wake; the debounce filter runs in the consumer task, where
//! the wraparound arithmetic is ordinary, preemptible code and interrupt
//! latency stays minimal.
//!
//! ```text
//! GPIO edge ──▶ ISR (timestamp + wake, bounded) ──▶ consumer task
//!                                                     │ debounce
//!                                                     ▼
//!                                            EdgeDelegate::on_pin_interrupt
//! ```
//!
//! The raw timestamp is single-writer: the ISR stores with `Release`, the
//! consumer loads with `Acquire`; no lock is involved.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::info;

use crate::error::{Error, LifecycleError, Result};
use crate::notify::WakeQueue;
use crate::task::{spawn_consumer, TaskOptions};

/// Input pad configuration for the observed pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Floating,
    PullUp,
    PullDown,
}

/// Which transitions raise an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    RisingEdge,
    FallingEdge,
    AnyEdge,
}

/// Handler invoked once per debounced edge, in task context.
///
/// Injected at [`EdgePin::start_tasks`]; the implementing object stands in
/// for what a subclass override would be in an inheritance design.
pub trait EdgeDelegate: Send {
    fn on_pin_interrupt(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Debounce filter
// ───────────────────────────────────────────────────────────────

/// Task-context debounce over monotonic millisecond timestamps.
///
/// The first edge is always accepted. A later edge is accepted iff at least
/// `interval_ms` elapsed since the previously *accepted* edge; rejected
/// edges do not move the reference point. Comparison uses `wrapping_sub`,
/// so the u32 clock rolling over (~49.7 days) does not produce a stuck or
/// double-firing filter.
#[derive(Debug, Clone)]
pub struct DebounceFilter {
    interval_ms: u32,
    last_accepted: Option<u32>,
}

impl DebounceFilter {
    pub fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms,
            last_accepted: None,
        }
    }

    /// Feed one edge timestamp; `true` means the edge survives debouncing.
    pub fn accept(&mut self, edge_ms: u32) -> bool {
        match self.last_accepted {
            Some(prev) if edge_ms.wrapping_sub(prev) < self.interval_ms => false,
            _ => {
                self.last_accepted = Some(edge_ms);
                true
            }
        }
    }

    /// Forget the last accepted edge (the next edge is always accepted).
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }
}

// ───────────────────────────────────────────────────────────────
// Edge pin
// ───────────────────────────────────────────────────────────────

enum EdgeWake {
    Edge(u32),
    Stop,
}

/// State shared between the ISR and the consumer task.
struct EdgeShared {
    queue: WakeQueue<EdgeWake, 8>,
    /// Raw ISR timestamp. Written by the ISR (`Release`), read from task
    /// context (`Acquire`); single writer, single reader.
    last_edge_ms: AtomicU32,
    /// Cleared first during teardown so a late wake cannot reach the
    /// handler of a half-destroyed instance.
    attached: AtomicBool,
}

/// Interrupt handler body. Bounded, allocation-free: timestamp store plus a
/// non-blocking wake.
fn record_edge(shared: &EdgeShared, timestamp_ms: u32) {
    if !shared.attached.load(Ordering::Acquire) {
        return;
    }
    shared.last_edge_ms.store(timestamp_ms, Ordering::Release);
    let _ = shared.queue.send_from_isr(EdgeWake::Edge(timestamp_ms));
}

/// One observed input pin with ISR capture and task-context debounce.
///
/// Construction configures nothing; [`start_tasks`](Self::start_tasks)
/// spins up the consumer task and attaches the interrupt, and
/// [`stop`](Self::stop) (also run on drop) detaches the interrupt before
/// the consumer task is torn down.
pub struct EdgePin {
    pin: i32,
    debounce_ms: u32,
    input_mode: InputMode,
    trigger_mode: TriggerMode,
    shared: Arc<EdgeShared>,
    consumer: Option<std::thread::JoinHandle<()>>,
}

impl EdgePin {
    pub fn new(pin: i32, debounce_ms: u32, input_mode: InputMode, trigger_mode: TriggerMode) -> Self {
        Self {
            pin,
            debounce_ms,
            input_mode,
            trigger_mode,
            shared: Arc::new(EdgeShared {
                queue: WakeQueue::new(),
                last_edge_ms: AtomicU32::new(0),
                attached: AtomicBool::new(false),
            }),
            consumer: None,
        }
    }

    /// GPIO pin this instance observes.
    pub fn pin(&self) -> i32 {
        self.pin
    }

    /// Whether the consumer task is currently running.
    pub fn is_running(&self) -> bool {
        self.consumer.is_some()
    }

    /// Raw timestamp of the most recent edge the ISR saw (debounced or not).
    pub fn last_edge_ms(&self) -> u32 {
        self.shared.last_edge_ms.load(Ordering::Acquire)
    }

    /// Spin up the consumer task, then attach the interrupt.
    ///
    /// `handler` runs on the consumer task, once per debounced edge.
    pub fn start_tasks(
        &mut self,
        handler: impl EdgeDelegate + 'static,
        opts: TaskOptions,
    ) -> Result<()> {
        if self.consumer.is_some() {
            return Err(Error::Lifecycle(LifecycleError::TaskAlreadyStarted));
        }

        self.shared.queue.drain();

        let shared = Arc::clone(&self.shared);
        let mut filter = DebounceFilter::new(self.debounce_ms);
        let mut handler = handler;
        let join = spawn_consumer("edge-loop\0", opts, move || loop {
            match shared.queue.recv() {
                EdgeWake::Edge(ts) => {
                    if shared.attached.load(Ordering::Acquire) && filter.accept(ts) {
                        handler.on_pin_interrupt();
                    }
                }
                EdgeWake::Stop => break,
            }
        })?;
        self.consumer = Some(join);

        if let Err(e) = self.attach_interrupt() {
            self.stop_consumer();
            return Err(e);
        }

        info!(
            "edge: pin {} armed ({:?}/{:?}, debounce {}ms)",
            self.pin, self.input_mode, self.trigger_mode, self.debounce_ms
        );
        Ok(())
    }

    /// Detach the interrupt, then stop and join the consumer task.
    /// Idempotent; safe on a never-started instance.
    pub fn stop(&mut self) {
        let was_attached = self.shared.attached.swap(false, Ordering::AcqRel);
        if was_attached {
            self.detach_interrupt();
        }
        if self.consumer.is_some() {
            self.stop_consumer();
            info!("edge: pin {} stopped", self.pin);
        }
    }

    fn stop_consumer(&mut self) {
        if let Some(join) = self.consumer.take() {
            self.shared.queue.send_blocking(EdgeWake::Stop);
            let _ = join.join();
        }
    }

    // ── Interrupt attach/detach ───────────────────────────────

    #[cfg(target_os = "espidf")]
    fn attach_interrupt(&self) -> Result<()> {
        use esp_idf_svc::sys::*;

        // SAFETY: idempotent service install (ESP_ERR_INVALID_STATE means
        // already installed); the registered handler only touches the
        // shared state, whose Arc outlives the registration — detach
        // removes the handler before the Arc can drop.
        unsafe {
            let ret = gpio_install_isr_service(0);
            if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
                return Err(Error::Init("GPIO ISR service install failed"));
            }

            let cfg = gpio_config_t {
                pin_bit_mask: 1u64 << self.pin,
                mode: gpio_mode_t_GPIO_MODE_INPUT,
                pull_up_en: match self.input_mode {
                    InputMode::PullUp => gpio_pullup_t_GPIO_PULLUP_ENABLE,
                    _ => gpio_pullup_t_GPIO_PULLUP_DISABLE,
                },
                pull_down_en: match self.input_mode {
                    InputMode::PullDown => gpio_pulldown_t_GPIO_PULLDOWN_ENABLE,
                    _ => gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
                },
                intr_type: match self.trigger_mode {
                    TriggerMode::RisingEdge => gpio_int_type_t_GPIO_INTR_POSEDGE,
                    TriggerMode::FallingEdge => gpio_int_type_t_GPIO_INTR_NEGEDGE,
                    TriggerMode::AnyEdge => gpio_int_type_t_GPIO_INTR_ANYEDGE,
                },
            };
            if gpio_config(&cfg) != ESP_OK {
                return Err(Error::Init("GPIO config failed"));
            }

            let arg = Arc::as_ptr(&self.shared) as *mut core::ffi::c_void;
            if gpio_isr_handler_add(self.pin, Some(edge_gpio_isr), arg) != ESP_OK {
                return Err(Error::Init("GPIO ISR handler add failed"));
            }
            gpio_intr_enable(self.pin);
        }

        self.shared.attached.store(true, Ordering::Release);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn attach_interrupt(&self) -> Result<()> {
        self.shared.attached.store(true, Ordering::Release);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn detach_interrupt(&self) {
        // SAFETY: removes this pin's handler; after return no further ISR
        // invocation can observe the shared state.
        unsafe {
            esp_idf_svc::sys::gpio_intr_disable(self.pin);
            esp_idf_svc::sys::gpio_isr_handler_remove(self.pin);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn detach_interrupt(&self) {}

    /// Stand-in for the ISR on host builds: feed one raw edge at the given
    /// monotonic timestamp. No-op once stopped.
    #[cfg(not(target_os = "espidf"))]
    pub fn inject_edge(&self, timestamp_ms: u32) {
        record_edge(&self.shared, timestamp_ms);
    }
}

impl Drop for EdgePin {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn edge_gpio_isr(arg: *mut core::ffi::c_void) {
    // SAFETY: arg is the instance's EdgeShared, registered in
    // attach_interrupt and removed in detach_interrupt before the Arc
    // drops; the pointee is valid for every invocation.
    let shared = unsafe { &*(arg as *const EdgeShared) };
    record_edge(shared, crate::time::now_ms());
}
