//! Accelerator facade
//!
//! Unified control surface over one accelerator inside a design: start/stop,
//! completion wait, argument register access and buffer attachment. Concrete
//! implementations live with their platforms; application code holds an
//! `Arc<dyn Accelerator>` and does not care which fabric is underneath.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{HalError, Result};
use crate::memory::DeviceBuffer;

/// How long [`Accelerator::wait_done`] polls before giving up.
pub const DONE_TIMEOUT: Duration = Duration::from_secs(1);

/// Accelerator start behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Run one invocation and stop.
    Once,

    /// Auto-restart after each invocation until stopped.
    Continuous,
}

/// Coarse device state decoded from the control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// State could not be decoded.
    Unknown,
    /// Last invocation finished.
    Done,
    /// Ready for a new invocation.
    Idle,
    /// Invocation in flight.
    Running,
    /// Device reported an error.
    Error,
}

/// Block-level control protocol shared by HLS-generated designs.
///
/// Offset 0 of every accelerator window is the `ap_ctrl` register: bit 0
/// starts an invocation, bit 7 enables auto-restart, bits 1-2 report
/// done/idle.
pub mod ctrl {
    /// Control register offset inside the accelerator window.
    pub const REG_CTRL: u64 = 0x00;
    /// Start one invocation.
    pub const START_ONCE: u32 = 0x01;
    /// Start with auto-restart.
    pub const START_CONTINUOUS: u32 = 0x81;
    /// Clear the start/auto-restart bits.
    pub const STOP: u32 = 0x00;
    /// Done bit pattern.
    pub const DONE: u32 = 0x06;
    /// Idle bit pattern.
    pub const IDLE: u32 = 0x04;
}

/// Decode a raw `ap_ctrl` value into a [`DeviceState`].
#[must_use]
pub fn decode_ctrl(value: u32) -> DeviceState {
    match value {
        0x01 | 0x03 | 0x81 | 0x83 => DeviceState::Running,
        x if x == ctrl::IDLE => DeviceState::Idle,
        x if x == ctrl::DONE => DeviceState::Done,
        _ => DeviceState::Unknown,
    }
}

/// Control surface of one accelerator.
///
/// All methods are synchronous; deferred variants that run on an execution
/// stream are provided by [`crate::exec::QueuedAccelerator`].
pub trait Accelerator: Send + Sync {
    /// Start an invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the control register cannot be written.
    fn start(&self, mode: StartMode) -> Result<()>;

    /// Clear the start/auto-restart bits.
    ///
    /// # Errors
    ///
    /// Returns an error if the control register cannot be written.
    fn stop(&self) -> Result<()>;

    /// Block until the accelerator reports done or idle.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the device does not settle within
    /// [`DONE_TIMEOUT`], or an error if the control register cannot be read.
    fn wait_done(&self) -> Result<()>;

    /// Current device state.
    fn status(&self) -> DeviceState;

    /// Write consecutive 32-bit argument registers starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address range falls outside the accelerator
    /// window or the write fails.
    fn write_register(&self, addr: u64, data: &[u32]) -> Result<()>;

    /// Read consecutive 32-bit argument registers starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address range falls outside the accelerator
    /// window or the read fails.
    fn read_register(&self, addr: u64, out: &mut [u32]) -> Result<()>;

    /// Write a buffer's device address into the argument register at `addr`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the buffer has no device address, or an
    /// error if the register write fails.
    fn attach(&self, addr: u64, buffer: &Arc<dyn DeviceBuffer>) -> Result<()> {
        let Some(device_addr) = buffer.device_addr() else {
            return Err(HalError::invalid_parameter(
                "buffer has no device address; is it device-visible memory?",
            ));
        };
        // Argument registers carry the low 32 bits; designs with windows
        // above 4 GiB pair this with an MSB register.
        #[allow(clippy::cast_possible_truncation)]
        let low = device_addr as u32;
        self.write_register(addr, &[low])
    }
}

/// Poll a control register until the device reports done or idle.
///
/// Shared by the platform implementations of [`Accelerator::wait_done`].
pub(crate) fn poll_until_done(
    mut read_ctrl: impl FnMut() -> Result<u32>,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match decode_ctrl(read_ctrl()?) {
            DeviceState::Done | DeviceState::Idle => return Ok(()),
            DeviceState::Error => {
                return Err(HalError::operation_failed("accelerator reported an error"))
            }
            DeviceState::Running | DeviceState::Unknown => {}
        }
        if Instant::now() >= deadline {
            #[allow(clippy::cast_possible_truncation)]
            return Err(HalError::Timeout {
                duration_ms: timeout.as_millis() as u64,
            });
        }
        std::thread::sleep(Duration::from_micros(10));
    }
}
