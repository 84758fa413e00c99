//! Cross-context wake queue.
//!
//! The interrupt-to-task handoff both subsystems share: a counting,
//! data-carrying notification channel. Producers (GPIO ISRs, timer
//! callbacks) never block and never allocate; the single consumer task
//! blocks until a message arrives. Because every wake carries its payload,
//! a transaction identifier is read atomically with the wake that delivered
//! it, and counting semantics keep one pending notification per source even
//! when the consumer is momentarily busy.
//!
//! ```text
//! GPIO ISR ───┐
//! Timer cb ───┼──▶ try_send ──▶ [ channel (N deep) ] ──▶ recv ──▶ consumer
//! Stop req ───┘      (drop-on-full, counted by caller)        (blocks)
//! ```
//!
//! On the host the blocking side is `block_on(channel.receive())`. On
//! ESP-IDF, `std` thread parking is not ISR-safe, so the blocking wait is a
//! FreeRTOS counting semaphore paired with `try_receive`; each successful
//! `try_send` is matched by exactly one semaphore give.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};

pub(crate) struct WakeQueue<T: 'static, const N: usize> {
    channel: Channel<CriticalSectionRawMutex, T, N>,
    #[cfg(target_os = "espidf")]
    sem: sem::CountingSemaphore,
}

impl<T: 'static, const N: usize> WakeQueue<T, N> {
    pub fn new() -> Self {
        Self {
            channel: Channel::new(),
            #[cfg(target_os = "espidf")]
            sem: sem::CountingSemaphore::new(N as u32),
        }
    }

    /// Non-blocking send from ISR context. Returns `false` when the queue is
    /// full and the wake was dropped; the caller accounts for the loss.
    pub fn send_from_isr(&self, msg: T) -> bool {
        if self.channel.try_send(msg).is_err() {
            return false;
        }
        #[cfg(target_os = "espidf")]
        self.sem.give_from_isr();
        true
    }

    /// Non-blocking send from timer/task context. Same drop-on-full policy
    /// as [`send_from_isr`](Self::send_from_isr).
    pub fn send(&self, msg: T) -> bool {
        if self.channel.try_send(msg).is_err() {
            return false;
        }
        #[cfg(target_os = "espidf")]
        self.sem.give();
        true
    }

    /// Send that must not be lost (shutdown requests). Task context only:
    /// spins on a full queue, which the consumer is actively draining.
    pub fn send_blocking(&self, msg: T) {
        let mut msg = msg;
        loop {
            match self.channel.try_send(msg) {
                Ok(()) => {
                    #[cfg(target_os = "espidf")]
                    self.sem.give();
                    return;
                }
                Err(TrySendError::Full(m)) => {
                    msg = m;
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Block until a message arrives. Consumer task context only.
    #[cfg(not(target_os = "espidf"))]
    pub fn recv(&self) -> T {
        futures_lite::future::block_on(self.channel.receive())
    }

    /// Block until a message arrives. Consumer task context only.
    #[cfg(target_os = "espidf")]
    pub fn recv(&self) -> T {
        loop {
            self.sem.take();
            // A give without a matching message cannot happen; the loop
            // guards against spurious semaphore wakeups all the same.
            if let Ok(msg) = self.channel.try_receive() {
                return msg;
            }
        }
    }

    /// Discard anything still queued. Task context, used on re-init.
    pub fn drain(&self) {
        while self.channel.try_receive().is_ok() {}
    }
}

#[cfg(target_os = "espidf")]
mod sem {
    //! Raw FreeRTOS counting semaphore. `xSemaphoreCreateCounting` and
    //! friends are macros over these queue functions, which is what the
    //! bindings expose.

    use esp_idf_svc::sys::{
        vQueueDelete, xQueueCreateCountingSemaphore, xQueueGenericSend, xQueueGiveFromISR,
        xQueueSemaphoreTake, BaseType_t, QueueHandle_t,
    };

    const QUEUE_SEND_TO_BACK: BaseType_t = 0;
    const PORT_MAX_DELAY: u32 = 0xffff_ffff;

    pub(super) struct CountingSemaphore(QueueHandle_t);

    // SAFETY: FreeRTOS semaphore handles are thread- and ISR-safe by
    // contract; the handle is only freed in Drop, after both contexts are
    // detached.
    unsafe impl Send for CountingSemaphore {}
    unsafe impl Sync for CountingSemaphore {}

    impl CountingSemaphore {
        pub fn new(max: u32) -> Self {
            // SAFETY: plain FreeRTOS allocation; paired with vQueueDelete.
            let handle = unsafe { xQueueCreateCountingSemaphore(max, 0) };
            assert!(!handle.is_null(), "counting semaphore allocation failed");
            Self(handle)
        }

        pub fn give(&self) {
            // SAFETY: zero-tick send never blocks; handle valid for self.
            unsafe { xQueueGenericSend(self.0, core::ptr::null(), 0, QUEUE_SEND_TO_BACK) };
        }

        pub fn give_from_isr(&self) {
            let mut higher_prio_woken: BaseType_t = 0;
            // SAFETY: ISR-safe FreeRTOS call; handle valid for self.
            unsafe { xQueueGiveFromISR(self.0, &mut higher_prio_woken) };
        }

        pub fn take(&self) {
            // SAFETY: blocking take; only ever called from the consumer task.
            unsafe { xQueueSemaphoreTake(self.0, PORT_MAX_DELAY) };
        }
    }

    impl Drop for CountingSemaphore {
        fn drop(&mut self) {
            // SAFETY: both producer and consumer are gone once the owning
            // WakeQueue drops.
            unsafe { vQueueDelete(self.0) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_recv_delivers_in_order() {
        let q: WakeQueue<u8, 4> = WakeQueue::new();
        assert!(q.send(1));
        assert!(q.send_from_isr(2));
        assert_eq!(q.recv(), 1);
        assert_eq!(q.recv(), 2);
    }

    #[test]
    fn full_queue_drops_wake() {
        let q: WakeQueue<u8, 2> = WakeQueue::new();
        assert!(q.send(1));
        assert!(q.send(2));
        assert!(!q.send(3));
        assert_eq!(q.recv(), 1);
    }

    #[test]
    fn drain_empties_queue() {
        let q: WakeQueue<u8, 4> = WakeQueue::new();
        assert!(q.send(1));
        assert!(q.send(2));
        q.drain();
        assert!(q.send(9));
        assert_eq!(q.recv(), 9);
    }

    #[test]
    fn recv_blocks_until_cross_thread_send() {
        use std::sync::Arc;

        let q: Arc<WakeQueue<u8, 4>> = Arc::new(WakeQueue::new());
        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                assert!(q.send_from_isr(42));
            })
        };
        assert_eq!(q.recv(), 42);
        producer.join().unwrap();
    }
}
