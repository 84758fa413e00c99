//! ESP-IDF glue: SPI master device and esp_timer plumbing.
//!
//! Raw `esp-idf-svc` sys calls; nothing here is compiled on host targets.
//! Timer callbacks run in the esp_timer dispatch task and obey the same
//! constraints as ISR code: bounded, non-blocking, no allocation.

use std::sync::Arc;

use esp_idf_svc::sys::{
    esp_timer_create, esp_timer_create_args_t, esp_timer_delete,
    esp_timer_dispatch_t_ESP_TIMER_TASK, esp_timer_handle_t, esp_timer_start_once,
    esp_timer_start_periodic, esp_timer_stop, spi_bus_add_device, spi_bus_config_t,
    spi_bus_config_t__bindgen_ty_1, spi_bus_config_t__bindgen_ty_2,
    spi_bus_config_t__bindgen_ty_3, spi_bus_config_t__bindgen_ty_4, spi_bus_free,
    spi_bus_initialize, spi_bus_remove_device, spi_common_dma_t_SPI_DMA_CH1,
    spi_common_dma_t_SPI_DMA_CH2, spi_common_dma_t_SPI_DMA_CH_AUTO,
    spi_common_dma_t_SPI_DMA_DISABLED, spi_device_handle_t, spi_device_interface_config_t,
    spi_device_polling_transmit, spi_host_device_t_SPI2_HOST, spi_host_device_t_SPI3_HOST,
    spi_transaction_t, spi_transaction_t__bindgen_ty_1, spi_transaction_t__bindgen_ty_2,
    ESP_OK,
};
use log::error;

use crate::config::{DmaMode, SpiBusConfig, SpiHost};
use crate::error::Error;

use super::descriptor::{Slot, TransactionDescriptor};
use super::{fire_slot, SerialShared};

// ───────────────────────────────────────────────────────────────
// Slave handle
// ───────────────────────────────────────────────────────────────

/// Copyable device reference stored inside descriptors. The owning
/// [`SlaveHandle`] keeps the driver handle valid; teardown stops every
/// timer before the handle drops.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlaveRef(spi_device_handle_t);

impl Default for SlaveRef {
    fn default() -> Self {
        Self(core::ptr::null_mut())
    }
}

// SAFETY: the ESP-IDF SPI master driver serialises device access
// internally; the raw handle is only dereferenced by the driver.
unsafe impl Send for SlaveRef {}
unsafe impl Sync for SlaveRef {}

/// Owning handle to the attached bus peer. Created at protocol init,
/// dropped at shutdown after all timers are stopped.
pub(crate) struct SlaveHandle {
    device: spi_device_handle_t,
    host: u32,
}

// SAFETY: exclusive owner of the device registration; only the scheduler
// (one task) touches it.
unsafe impl Send for SlaveHandle {}

impl SlaveHandle {
    /// Initialise the bus and attach one slave.
    pub fn open(config: &SpiBusConfig) -> Result<Self, Error> {
        let host = match config.host {
            SpiHost::Spi2 => spi_host_device_t_SPI2_HOST,
            SpiHost::Spi3 => spi_host_device_t_SPI3_HOST,
        };
        let dma = match config.dma {
            DmaMode::Disabled => spi_common_dma_t_SPI_DMA_DISABLED,
            DmaMode::Channel1 => spi_common_dma_t_SPI_DMA_CH1,
            DmaMode::Channel2 => spi_common_dma_t_SPI_DMA_CH2,
            DmaMode::Auto => spi_common_dma_t_SPI_DMA_CH_AUTO,
        };

        let bus_cfg = spi_bus_config_t {
            __bindgen_anon_1: spi_bus_config_t__bindgen_ty_1 {
                mosi_io_num: config.mosi_gpio,
            },
            __bindgen_anon_2: spi_bus_config_t__bindgen_ty_2 {
                miso_io_num: config.miso_gpio,
            },
            sclk_io_num: config.sclk_gpio,
            __bindgen_anon_3: spi_bus_config_t__bindgen_ty_3 {
                quadwp_io_num: config.quadwp_gpio,
            },
            __bindgen_anon_4: spi_bus_config_t__bindgen_ty_4 {
                quadhd_io_num: config.quadhd_gpio,
            },
            ..Default::default()
        };

        // SAFETY: one bus init per instance; freed in Drop.
        let ret = unsafe { spi_bus_initialize(host, &bus_cfg, dma) };
        if ret != ESP_OK {
            error!("spi: bus initialise failed (rc={})", ret);
            return Err(Error::Init("SPI bus initialise failed"));
        }

        let dev_cfg = spi_device_interface_config_t {
            spics_io_num: config.cs_gpio,
            clock_speed_hz: config.clock_hz as i32,
            duty_cycle_pos: config.duty_cycle_pos,
            queue_size: 3,
            mode: 0,
            ..Default::default()
        };
        let mut device: spi_device_handle_t = core::ptr::null_mut();
        // SAFETY: dev_cfg outlives the call; device handle freed in Drop.
        let ret = unsafe { spi_bus_add_device(host, &dev_cfg, &mut device) };
        if ret != ESP_OK {
            // SAFETY: bus was initialised just above and has no devices.
            unsafe { spi_bus_free(host) };
            error!("spi: slave attach failed (rc={})", ret);
            return Err(Error::Init("SPI slave attach failed"));
        }

        Ok(Self { device, host })
    }

    pub fn device(&self) -> SlaveRef {
        SlaveRef(self.device)
    }
}

impl Drop for SlaveHandle {
    fn drop(&mut self) {
        // SAFETY: the scheduler stops every timer before dropping this
        // handle, so no transceive can still reference the device.
        unsafe {
            spi_bus_remove_device(self.device);
            spi_bus_free(self.host);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Transceive
// ───────────────────────────────────────────────────────────────

/// Timer-context transceive against the pre-populated descriptor.
/// Allocation-free; the caller counts failures, nothing is surfaced.
pub(super) fn transceive(
    desc: &TransactionDescriptor,
    rx: &mut [u8],
) -> core::result::Result<(), ()> {
    let mut trans = spi_transaction_t {
        length: desc.tx.len() * 8,
        __bindgen_anon_1: spi_transaction_t__bindgen_ty_1 {
            tx_buffer: desc.tx.as_ptr().cast(),
        },
        __bindgen_anon_2: spi_transaction_t__bindgen_ty_2 {
            rx_buffer: rx.as_mut_ptr().cast(),
        },
        ..Default::default()
    };
    // SAFETY: both buffers outlive the polling call; the descriptor is held
    // in the slot arena for the whole critical section.
    let ret = unsafe { spi_device_polling_transmit(desc.slave.0, &mut trans) };
    if ret == ESP_OK { Ok(()) } else { Err(()) }
}

// ───────────────────────────────────────────────────────────────
// Timers
// ───────────────────────────────────────────────────────────────

struct TimerArg {
    shared: Arc<SerialShared>,
    slot: Slot,
}

/// One esp_timer bound to one slot.
pub(crate) struct EspTimer {
    handle: esp_timer_handle_t,
    arg: *mut TimerArg,
}

// SAFETY: the handle and arg pointer are only used from the owning
// scheduler task; the callback receives the arg through the driver.
unsafe impl Send for EspTimer {}

unsafe extern "C" fn slot_timer_cb(arg: *mut core::ffi::c_void) {
    // SAFETY: arg is the Box<TimerArg> owned by the EspTimer; stop()
    // deletes the timer before freeing it, so the pointee is valid for
    // every dispatch.
    let ctx = unsafe { &*(arg as *const TimerArg) };
    fire_slot(&ctx.shared, ctx.slot);
}

impl EspTimer {
    /// Create and start the timer: periodic for `interval_ms > 0`, a
    /// single near-immediate shot for `interval_ms == 0`.
    pub fn start(shared: Arc<SerialShared>, slot: Slot, interval_ms: u16) -> Result<Self, Error> {
        let arg = Box::into_raw(Box::new(TimerArg { shared, slot }));
        let args = esp_timer_create_args_t {
            callback: Some(slot_timer_cb),
            arg: arg.cast(),
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: b"edgebus\0".as_ptr().cast(),
            skip_unhandled_events: false,
        };
        let mut handle: esp_timer_handle_t = core::ptr::null_mut();
        // SAFETY: args is fully initialised and copied by the driver.
        let ret = unsafe { esp_timer_create(&args, &mut handle) };
        if ret != ESP_OK {
            // SAFETY: the callback was never registered; reclaim the arg.
            drop(unsafe { Box::from_raw(arg) });
            error!("spi: timer create failed (rc={})", ret);
            return Err(Error::Init("timer create failed"));
        }

        let ret = if interval_ms == 0 {
            // SAFETY: handle is valid from the successful create above.
            unsafe { esp_timer_start_once(handle, 100) }
        } else {
            // SAFETY: as above.
            unsafe { esp_timer_start_periodic(handle, u64::from(interval_ms) * 1_000) }
        };
        if ret != ESP_OK {
            // SAFETY: created but not started; delete unregisters it.
            unsafe { esp_timer_delete(handle) };
            drop(unsafe { Box::from_raw(arg) });
            error!("spi: timer start failed (rc={})", ret);
            return Err(Error::Init("timer start failed"));
        }

        Ok(Self { handle, arg })
    }

    /// Stop and delete the timer; after return the callback cannot run.
    pub fn stop(self) {
        // SAFETY: stop on an expired one-shot returns INVALID_STATE, which
        // is fine; delete unregisters the callback, after which the arg can
        // be reclaimed.
        unsafe {
            esp_timer_stop(self.handle);
            esp_timer_delete(self.handle);
            drop(Box::from_raw(self.arg));
        }
    }
}
