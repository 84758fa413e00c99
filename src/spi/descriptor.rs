//! Transaction descriptors and the fixed slot arena.
//!
//! The three ownership positions — one-shot, timer A, timer B — are a
//! pre-allocated arena indexed by [`Slot`]. The firing context reads a
//! descriptor under a critical section; task context arms and frees through
//! the same cells, so a descriptor can never be freed while a firing holds
//! it and no raw pointer ever escapes the arena.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use super::SlaveRef;

/// Largest payload one transaction may carry, in bytes.
pub const MAX_FRAME_LEN: usize = 64;

/// The three descriptor ownership positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// One-shot transactions (`interval == 0`); freed after completion.
    Once = 0,
    /// First periodic hardware timer.
    TimerA = 1,
    /// Second periodic hardware timer.
    TimerB = 2,
}

impl Slot {
    pub(crate) const ALL: [Slot; 3] = [Slot::Once, Slot::TimerA, Slot::TimerB];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Full description of one armed bus exchange.
pub(crate) struct TransactionDescriptor {
    /// Outbound payload; the transceive clocks the same number of bytes in.
    pub tx: Vec<u8, MAX_FRAME_LEN>,
    /// Identifier delivered to the handler with the completion.
    pub trans_id: u8,
    /// Repeat interval in ms; 0 means one-shot.
    pub interval_ms: u16,
    /// Free the slot from task context once the handler has seen the data.
    pub del_after_read: bool,
    /// Target peer on the bus.
    pub slave: SlaveRef,
}

type Cell = Mutex<CriticalSectionRawMutex, RefCell<Option<TransactionDescriptor>>>;

/// Pre-allocated descriptor storage, one cell per [`Slot`].
pub(crate) struct SlotArena {
    cells: [Cell; 3],
}

impl SlotArena {
    pub fn new() -> Self {
        Self {
            cells: [
                Mutex::new(RefCell::new(None)),
                Mutex::new(RefCell::new(None)),
                Mutex::new(RefCell::new(None)),
            ],
        }
    }

    /// Run `f` with exclusive access to the slot's cell. The closure runs
    /// inside a critical section: keep it bounded and non-blocking.
    pub fn with<R>(&self, slot: Slot, f: impl FnOnce(&mut Option<TransactionDescriptor>) -> R) -> R {
        self.cells[slot.index()].lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn occupied(&self, slot: Slot) -> bool {
        self.with(slot, |d| d.is_some())
    }

    /// Populate an empty slot. `false` if the slot is still armed.
    pub fn arm(&self, slot: Slot, desc: TransactionDescriptor) -> bool {
        self.with(slot, |d| {
            if d.is_some() {
                false
            } else {
                *d = Some(desc);
                true
            }
        })
    }

    /// Disarm and reclaim the descriptor. Task context only.
    pub fn take(&self, slot: Slot) -> Option<TransactionDescriptor> {
        self.with(slot, |d| d.take())
    }
}
