//! Periodic SPI transaction scheduler.
//!
//! Owns up to three transaction slots — one one-shot, two independently
//! periodic — driven by hardware timers. The timer-context handler performs
//! the transceive against a pre-populated descriptor and wakes the consumer
//! task with the completed frame; all arming, freeing and dispatch logic
//! runs in task context.
//!
//! ```text
//! timer A ──┐
//! timer B ──┼─▶ fire (transceive, bounded) ──▶ wake queue ──▶ consumer task
//! one-shot ─┘         │                                          │
//!                     ▼                                          ▼
//!               slot arena (3 cells)                SerialDelegate::on_serial_event
//! ```
//!
//! Bus-level transceive errors in the firing context are dropped by design —
//! there is no safe reporting channel there. A best-effort counter is
//! readable from task context via [`SpiScheduler::stats`].

mod descriptor;

#[cfg(target_os = "espidf")]
mod hw;

pub use descriptor::{Slot, MAX_FRAME_LEN};

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::info;

use crate::config::SpiBusConfig;
use crate::error::{CapacityError, ConfigError, Error, LifecycleError, Result};
use crate::notify::WakeQueue;
use crate::task::{spawn_consumer, TaskOptions};

use descriptor::{SlotArena, TransactionDescriptor};

#[cfg(target_os = "espidf")]
use hw::{transceive, SlaveRef};

/// Opaque reference to the attached bus peer. The simulated peer is a
/// full-duplex loopback.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SlaveRef;

#[cfg(not(target_os = "espidf"))]
impl SlaveRef {
    fn transfer(&self, tx: &[u8], rx: &mut [u8]) {
        rx.copy_from_slice(tx);
    }
}

#[cfg(not(target_os = "espidf"))]
fn transceive(desc: &TransactionDescriptor, rx: &mut [u8]) -> core::result::Result<(), ()> {
    desc.slave.transfer(&desc.tx, rx);
    Ok(())
}

/// Handler invoked once per completed transaction, in task context.
///
/// Injected at [`SpiScheduler::init_serial_protocol`]; `trans_id` is the
/// sole means of distinguishing the up to three transaction streams
/// multiplexed onto one consumer task.
pub trait SerialDelegate: Send {
    fn on_serial_event(&mut self, data: &[u8], trans_id: u8);
}

/// Firing-context counters, readable from task context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerialStats {
    /// Transceives the bus driver rejected (dropped, by design unreported).
    pub transceive_errors: u32,
    /// Completions lost because the wake queue was full.
    pub dropped_wakes: u32,
}

// ───────────────────────────────────────────────────────────────
// Shared state and the firing path
// ───────────────────────────────────────────────────────────────

/// One completed exchange travelling from firing context to the consumer.
struct SerialFrame {
    trans_id: u8,
    slot: Slot,
    del_after_read: bool,
    data: heapless::Vec<u8, MAX_FRAME_LEN>,
}

enum SerialWake {
    Completed(SerialFrame),
    Stop,
}

/// State shared between timer contexts and the consumer task.
struct SerialShared {
    slots: SlotArena,
    queue: WakeQueue<SerialWake, 8>,
    transceive_errors: AtomicU32,
    dropped_wakes: AtomicU32,
    /// Set first during shutdown; firing and dispatch both check it.
    stopping: AtomicBool,
}

impl SerialShared {
    fn new() -> Self {
        Self {
            slots: SlotArena::new(),
            queue: WakeQueue::new(),
            transceive_errors: AtomicU32::new(0),
            dropped_wakes: AtomicU32::new(0),
            stopping: AtomicBool::new(false),
        }
    }
}

/// Timer-context handler: transceive the slot's descriptor and wake the
/// consumer with the completed frame. Bounded and allocation-free; errors
/// are counted, never surfaced.
fn fire_slot(shared: &SerialShared, slot: Slot) {
    if shared.stopping.load(Ordering::Acquire) {
        return;
    }
    let frame = shared.slots.with(slot, |cell| {
        let desc = cell.as_mut()?;
        let n = desc.tx.len();
        let mut rx = [0u8; MAX_FRAME_LEN];
        if transceive(desc, &mut rx[..n]).is_err() {
            shared.transceive_errors.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let data = heapless::Vec::from_slice(&rx[..n]).ok()?;
        Some(SerialFrame {
            trans_id: desc.trans_id,
            slot,
            del_after_read: desc.del_after_read,
            data,
        })
    });
    if let Some(frame) = frame {
        if !shared.queue.send(SerialWake::Completed(frame)) {
            shared.dropped_wakes.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn serial_loop<H: SerialDelegate>(shared: &SerialShared, handler: &mut H) {
    loop {
        match shared.queue.recv() {
            SerialWake::Completed(frame) => {
                if shared.stopping.load(Ordering::Acquire) {
                    continue;
                }
                handler.on_serial_event(&frame.data, frame.trans_id);
                if frame.del_after_read {
                    // Task context is the only place a descriptor is freed;
                    // the one-shot slot becomes reusable here.
                    let _ = shared.slots.take(frame.slot);
                }
            }
            SerialWake::Stop => break,
        }
    }
}

/// Simulated hardware timer: fires the slot at its interval while armed.
#[cfg(not(target_os = "espidf"))]
fn sim_timer_loop(shared: &SerialShared, slot: Slot, interval_ms: u16) {
    if interval_ms == 0 {
        fire_slot(shared, slot);
        return;
    }
    let period = std::time::Duration::from_millis(u64::from(interval_ms));
    loop {
        std::thread::sleep(period);
        if shared.stopping.load(Ordering::Acquire) || !shared.slots.occupied(slot) {
            break;
        }
        fire_slot(shared, slot);
    }
}

// ───────────────────────────────────────────────────────────────
// Scheduler
// ───────────────────────────────────────────────────────────────

/// Periodic transaction scheduler for one SPI bus instance.
///
/// Call [`init_serial_protocol`](Self::init_serial_protocol) before arming
/// transactions and [`end_serial_protocol`](Self::end_serial_protocol)
/// (also run on drop) to tear everything down. Both are safe to call in any
/// lifecycle state.
pub struct SpiScheduler {
    shared: Arc<SerialShared>,
    consumer: Option<std::thread::JoinHandle<()>>,
    initialized: bool,
    config: Option<SpiBusConfig>,
    #[cfg(target_os = "espidf")]
    slave: Option<hw::SlaveHandle>,
    #[cfg(target_os = "espidf")]
    timers: [Option<hw::EspTimer>; 3],
    #[cfg(not(target_os = "espidf"))]
    timers: [Option<std::thread::JoinHandle<()>>; 3],
}

impl SpiScheduler {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SerialShared::new()),
            consumer: None,
            initialized: false,
            config: None,
            #[cfg(target_os = "espidf")]
            slave: None,
            timers: [None, None, None],
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The configuration consumed at init, while the protocol is active.
    pub fn config(&self) -> Option<SpiBusConfig> {
        self.config
    }

    /// Firing-context counters (error and overrun totals since init).
    pub fn stats(&self) -> SerialStats {
        SerialStats {
            transceive_errors: self.shared.transceive_errors.load(Ordering::Relaxed),
            dropped_wakes: self.shared.dropped_wakes.load(Ordering::Relaxed),
        }
    }

    /// Configure the bus, attach the slave and spin up the consumer task.
    ///
    /// Fails if the bus is already initialised or the configuration is
    /// invalid; no transaction may be armed before this succeeds.
    pub fn init_serial_protocol(
        &mut self,
        config: SpiBusConfig,
        handler: impl SerialDelegate + 'static,
        opts: TaskOptions,
    ) -> Result<()> {
        if self.initialized {
            return Err(Error::Config(ConfigError::AlreadyInitialized));
        }
        config.validate()?;

        // Fresh shared state per protocol session, so counters and queue
        // contents from a previous session cannot leak into this one.
        self.shared = Arc::new(SerialShared::new());

        #[cfg(target_os = "espidf")]
        {
            self.slave = Some(hw::SlaveHandle::open(&config)?);
        }

        let shared = Arc::clone(&self.shared);
        let mut handler = handler;
        let join = match spawn_consumer("serial-loop\0", opts, move || {
            serial_loop(&shared, &mut handler);
        }) {
            Ok(join) => join,
            Err(e) => {
                #[cfg(target_os = "espidf")]
                {
                    self.slave = None;
                }
                return Err(e);
            }
        };
        self.consumer = Some(join);
        self.config = Some(config);
        self.initialized = true;
        info!(
            "spi: protocol initialised ({:?}, {} Hz)",
            config.host, config.clock_hz
        );
        Ok(())
    }

    /// Arm one transaction slot.
    ///
    /// `interval_ms == 0` requests a one-shot on the `Once` slot, fired
    /// immediately and freed after the handler has seen the completion.
    /// Otherwise the transaction goes to timer A if free, else timer B;
    /// with both occupied the call fails and the armed slots are untouched.
    pub fn set_transaction_periodic(
        &mut self,
        interval_ms: u16,
        data: &[u8],
        trans_id: u8,
    ) -> Result<Slot> {
        if !self.initialized {
            return Err(Error::Lifecycle(LifecycleError::NotInitialized));
        }

        let slot = if interval_ms == 0 {
            if self.shared.slots.occupied(Slot::Once) {
                return Err(Error::Capacity(CapacityError::OneShotPending));
            }
            Slot::Once
        } else if !self.shared.slots.occupied(Slot::TimerA) {
            Slot::TimerA
        } else if !self.shared.slots.occupied(Slot::TimerB) {
            Slot::TimerB
        } else {
            return Err(Error::Capacity(CapacityError::NoFreePeriodicSlot));
        };

        // Reclaim the handle of an earlier, already-completed occupant
        // (one-shot timers outlive their descriptor by one dispatch).
        self.reap_timer(slot);

        let tx = heapless::Vec::from_slice(data)
            .map_err(|()| Error::Capacity(CapacityError::FrameTooLong))?;
        let desc = TransactionDescriptor {
            tx,
            trans_id,
            interval_ms,
            del_after_read: interval_ms == 0,
            slave: self.slave_ref(),
        };
        let interval = desc.interval_ms;

        if !self.shared.slots.arm(slot, desc) {
            return Err(Error::Capacity(match slot {
                Slot::Once => CapacityError::OneShotPending,
                _ => CapacityError::NoFreePeriodicSlot,
            }));
        }

        if let Err(e) = self.start_timer(slot, interval) {
            let _ = self.shared.slots.take(slot);
            return Err(e);
        }

        info!(
            "spi: armed {:?} (id={}, interval={}ms)",
            slot, trans_id, interval
        );
        Ok(slot)
    }

    /// Disarm one slot: stop its timer, then free the descriptor.
    pub fn clear_transaction(&mut self, slot: Slot) -> Result<()> {
        if !self.initialized {
            return Err(Error::Lifecycle(LifecycleError::NotInitialized));
        }
        self.disarm(slot);
        info!("spi: cleared {:?}", slot);
        Ok(())
    }

    /// Disarm all timers, stop the consumer task, release all descriptors
    /// and detach the slave — in that order. Idempotent; safe on a
    /// never-initialised instance. No handler runs after this returns.
    pub fn end_serial_protocol(&mut self) {
        if !self.initialized {
            return;
        }
        self.shared.stopping.store(true, Ordering::Release);

        // 1. Timers stop firing (sim timers exit on the stopping flag;
        //    the reap joins/deletes them, so the stop is confirmed).
        for slot in Slot::ALL {
            self.reap_timer(slot);
        }

        // 2. Consumer task drains and exits; any in-flight handler call
        //    completes before the join returns.
        if let Some(join) = self.consumer.take() {
            self.shared.queue.send_blocking(SerialWake::Stop);
            let _ = join.join();
        }

        // 3. Descriptors released from task context, timers confirmed idle.
        for slot in Slot::ALL {
            let _ = self.shared.slots.take(slot);
        }

        // 4. Slave detached, bus freed.
        #[cfg(target_os = "espidf")]
        {
            self.slave = None;
        }

        self.initialized = false;
        self.config = None;
        info!("spi: protocol ended");
    }

    // ── Internals ─────────────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn slave_ref(&self) -> SlaveRef {
        self.slave
            .as_ref()
            .map(hw::SlaveHandle::device)
            .unwrap_or_default()
    }

    #[cfg(not(target_os = "espidf"))]
    fn slave_ref(&self) -> SlaveRef {
        SlaveRef
    }

    /// Stop the slot's timer (confirmed, not merely requested), then free
    /// the descriptor from task context.
    #[cfg(target_os = "espidf")]
    fn disarm(&mut self, slot: Slot) {
        self.reap_timer(slot);
        let _ = self.shared.slots.take(slot);
    }

    #[cfg(not(target_os = "espidf"))]
    fn disarm(&mut self, slot: Slot) {
        // The simulated timer re-checks occupancy before every fire, so
        // emptying the cell disarms it; the join confirms it stopped.
        let _ = self.shared.slots.take(slot);
        self.reap_timer(slot);
    }

    #[cfg(target_os = "espidf")]
    fn reap_timer(&mut self, slot: Slot) {
        if let Some(timer) = self.timers[slot.index()].take() {
            timer.stop();
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn reap_timer(&mut self, slot: Slot) {
        if let Some(handle) = self.timers[slot.index()].take() {
            let _ = handle.join();
        }
    }

    #[cfg(target_os = "espidf")]
    fn start_timer(&mut self, slot: Slot, interval_ms: u16) -> Result<()> {
        let timer = hw::EspTimer::start(Arc::clone(&self.shared), slot, interval_ms)?;
        self.timers[slot.index()] = Some(timer);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn start_timer(&mut self, slot: Slot, interval_ms: u16) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("spi-timer".into())
            .spawn(move || sim_timer_loop(&shared, slot, interval_ms))
            .map_err(|_| Error::Spawn)?;
        self.timers[slot.index()] = Some(handle);
        Ok(())
    }
}

impl Default for SpiScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SpiScheduler {
    fn drop(&mut self) {
        self.end_serial_protocol();
    }
}
