//! PCIe kernel-driver platform
//!
//! Accelerator cards behind a kernel driver expose one char device whose
//! offset space covers the card's BARs: control windows for kernels and a
//! device-memory window for buffers. Every access is a positioned read or
//! write on that device; the driver performs the actual DMA.

use bytes::BytesMut;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::accelerator::{
    ctrl, decode_ctrl, poll_until_done, Accelerator, DeviceState, StartMode, DONE_TIMEOUT,
};
use crate::datamover::{DataMover, ExecMode};
use crate::error::{HalError, Result};
use crate::io::IoWindow;
use crate::memory::{check_range, DeviceBuffer, MemoryKind, SyncDirection};
use crate::platform::{Platform, PlatformConfig, PlatformKind};

/// Offset span of one kernel control window.
const ACCEL_SPAN: usize = 64 * 1024;

/// Buffer allocations are aligned to this many bytes.
const ALLOC_ALIGN: usize = 64;

/// Discover card device nodes matching `prefix` (e.g. `/dev/fabriq`).
///
/// Scans indices 0..16 the same way the kernel driver numbers cards. Returns
/// an empty list when no node exists; callers decide whether that is fatal.
#[must_use]
pub fn discover_devices(prefix: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for index in 0..16 {
        let path = PathBuf::from(format!("{prefix}{index}"));
        if path.exists() {
            tracing::debug!(path = %path.display(), "found card device node");
            found.push(path);
        }
    }
    found
}

/// PCIe kernel-driver platform.
#[derive(Debug)]
pub struct PciePlatform {
    device: Arc<File>,
    path: PathBuf,
    config: PlatformConfig,
}

impl PciePlatform {
    /// Open the kernel driver's char device.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if the device node does not exist, or an
    /// I/O error if it cannot be opened read-write.
    pub fn open(config: &PlatformConfig) -> Result<Self> {
        Self::open_path(&config.device_path, config)
    }

    /// Open a specific device node, e.g. one returned by
    /// [`discover_devices`].
    ///
    /// # Errors
    ///
    /// Same failure modes as [`PciePlatform::open`].
    pub fn open_path(path: &Path, config: &PlatformConfig) -> Result<Self> {
        if !path.exists() {
            return Err(HalError::device_not_found(path));
        }

        let device = File::options().read(true).write(true).open(path)?;

        tracing::info!(device = %path.display(), "PCIe kernel platform ready");

        Ok(Self {
            device: Arc::new(device),
            path: path.to_path_buf(),
            config: config.clone(),
        })
    }

    /// Device node this platform is bound to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Platform for PciePlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::PcieKernel
    }

    fn reset(&self) -> Result<()> {
        // Card resets (and xclbin loads) belong to the kernel driver's
        // management interface, not the data path this crate drives.
        tracing::info!(device = %self.path.display(), "PCIe platform reset requested");
        Ok(())
    }

    fn accelerator(&self, addr: u64) -> Result<Arc<dyn Accelerator>> {
        let window = IoWindow::new(Arc::clone(&self.device), addr, ACCEL_SPAN);
        tracing::debug!(addr = format_args!("{addr:#x}"), "kernel control window bound");
        Ok(Arc::new(PcieAccelerator { window }))
    }

    fn data_mover(&self, addr: u64) -> Result<Arc<dyn DataMover>> {
        let window = IoWindow::new(Arc::clone(&self.device), addr, self.config.buffer_span);
        tracing::debug!(
            addr = format_args!("{addr:#x}"),
            span = self.config.buffer_span,
            "device memory window bound"
        );
        Ok(Arc::new(PcieDataMover {
            window,
            cursor: Mutex::new(0),
        }))
    }
}

/// One kernel control window on the card.
#[derive(Debug)]
struct PcieAccelerator {
    window: IoWindow,
}

impl Accelerator for PcieAccelerator {
    fn start(&self, mode: StartMode) -> Result<()> {
        let value = match mode {
            StartMode::Once => ctrl::START_ONCE,
            StartMode::Continuous => ctrl::START_CONTINUOUS,
        };
        self.window.write32_at(ctrl::REG_CTRL, value)
    }

    fn stop(&self) -> Result<()> {
        self.window.write32_at(ctrl::REG_CTRL, ctrl::STOP)
    }

    fn wait_done(&self) -> Result<()> {
        poll_until_done(|| self.window.read32_at(ctrl::REG_CTRL), DONE_TIMEOUT)
    }

    fn status(&self) -> DeviceState {
        match self.window.read32_at(ctrl::REG_CTRL) {
            Ok(value) => decode_ctrl(value),
            Err(_) => DeviceState::Error,
        }
    }

    fn write_register(&self, addr: u64, data: &[u32]) -> Result<()> {
        for (i, word) in data.iter().enumerate() {
            self.window.write32_at(addr + (i as u64) * 4, *word)?;
        }
        Ok(())
    }

    fn read_register(&self, addr: u64, out: &mut [u32]) -> Result<()> {
        for (i, word) in out.iter_mut().enumerate() {
            *word = self.window.read32_at(addr + (i as u64) * 4)?;
        }
        Ok(())
    }
}

/// Transfer engine over the card's device-memory window.
///
/// The kernel driver completes each positioned write/read synchronously, so
/// `Deferred` transfers complete by the time the call returns and
/// [`DataMover::flush`] has nothing left to wait for.
#[derive(Debug)]
struct PcieDataMover {
    window: IoWindow,
    /// Bump cursor into the device window; allocations are never returned.
    cursor: Mutex<usize>,
}

impl DataMover for PcieDataMover {
    fn alloc(&self, size: usize, kind: MemoryKind) -> Result<Arc<dyn DeviceBuffer>> {
        if size == 0 {
            return Err(HalError::invalid_parameter("cannot allocate an empty buffer"));
        }

        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let offset = (*cursor + ALLOC_ALIGN - 1) & !(ALLOC_ALIGN - 1);
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= self.window.len())
            .ok_or_else(|| {
                HalError::configuration(format!(
                    "device memory window exhausted: {size} bytes requested, {} free",
                    self.window.len().saturating_sub(offset)
                ))
            })?;
        *cursor = end;
        drop(cursor);

        tracing::debug!(size, ?kind, offset, "card buffer allocated");

        Ok(Arc::new(PcieBuffer {
            window: self.window.clone(),
            offset: offset as u64,
            len: size,
            host: Mutex::new(BytesMut::zeroed(size)),
        }))
    }

    fn upload(
        &self,
        buffer: &Arc<dyn DeviceBuffer>,
        size: usize,
        offset: usize,
        mode: ExecMode,
    ) -> Result<()> {
        check_range(buffer.len(), offset, size)?;
        if mode == ExecMode::Deferred {
            tracing::trace!("deferred upload completes synchronously on kernel cards");
        }
        let mut chunk = vec![0u8; size];
        buffer.read_into(offset, &mut chunk)?;

        let device_offset = buffer.device_addr().ok_or_else(|| {
            HalError::invalid_parameter("buffer has no device address; not card memory")
        })?;
        self.window.write_at(device_offset + offset as u64, &chunk)
    }

    fn download(
        &self,
        buffer: &Arc<dyn DeviceBuffer>,
        size: usize,
        offset: usize,
        mode: ExecMode,
    ) -> Result<()> {
        check_range(buffer.len(), offset, size)?;
        if mode == ExecMode::Deferred {
            tracing::trace!("deferred download completes synchronously on kernel cards");
        }
        let device_offset = buffer.device_addr().ok_or_else(|| {
            HalError::invalid_parameter("buffer has no device address; not card memory")
        })?;

        let mut chunk = vec![0u8; size];
        self.window.read_at(device_offset + offset as u64, &mut chunk)?;
        buffer.write_from(offset, &chunk)
    }

    fn flush(&self, _direction: SyncDirection) -> Result<()> {
        // Kernel transfers are synchronous; nothing is outstanding.
        Ok(())
    }

    fn status(&self) -> DeviceState {
        DeviceState::Idle
    }
}

/// Buffer in the card's device-memory window, with a host staging mirror.
#[derive(Debug)]
struct PcieBuffer {
    window: IoWindow,
    /// Offset of this buffer inside the device-memory window.
    offset: u64,
    len: usize,
    host: Mutex<BytesMut>,
}

impl DeviceBuffer for PcieBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn device_addr(&self) -> Option<u64> {
        Some(self.offset)
    }

    fn write_from(&self, offset: usize, data: &[u8]) -> Result<()> {
        check_range(self.len, offset, data.len())?;
        let mut host = self.host.lock().unwrap_or_else(PoisonError::into_inner);
        host[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_into(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        check_range(self.len, offset, out.len())?;
        let host = self.host.lock().unwrap_or_else(PoisonError::into_inner);
        out.copy_from_slice(&host[offset..offset + out.len()]);
        Ok(())
    }

    fn sync(&self, direction: SyncDirection) -> Result<()> {
        let mut host = self.host.lock().unwrap_or_else(PoisonError::into_inner);
        match direction {
            SyncDirection::HostToDevice => self.window.write_at(self.offset, &host),
            SyncDirection::DeviceToHost => {
                let len = host.len();
                self.window.read_at(self.offset, &mut host[..len])
            }
        }
    }
}
