//! Memory-mapped AXI-lite platform
//!
//! SoC fabrics expose accelerator control windows and a reserved buffer
//! region directly in the physical address space. Registers follow the HLS
//! `ap_ctrl` protocol; transfers go through an AXI DMA engine programmed
//! over its MM2S/S2MM register pairs.

use bytes::BytesMut;
use std::fs::File;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::accelerator::{
    ctrl, decode_ctrl, poll_until_done, Accelerator, DeviceState, StartMode, DONE_TIMEOUT,
};
use crate::datamover::{DataMover, ExecMode};
use crate::error::{HalError, Result};
use crate::memory::{check_range, DeviceBuffer, MemoryKind, SyncDirection};
use crate::mmio::MappedRegion;
use crate::platform::{Platform, PlatformConfig, PlatformKind};

/// Address-space span of one accelerator control window.
const ACCEL_SPAN: usize = 64 * 1024;

/// Register span of the AXI DMA engine.
const DMA_SPAN: usize = 4 * 1024;

/// Buffer allocations are aligned to this many bytes.
const ALLOC_ALIGN: usize = 64;

/// AXI DMA register map (MM2S = host to device, S2MM = device to host).
mod dma {
    /// MM2S control register.
    pub const MM2S_DMACR: u64 = 0x00;
    /// MM2S status register.
    pub const MM2S_DMASR: u64 = 0x04;
    /// MM2S source address, low word.
    pub const MM2S_SA: u64 = 0x18;
    /// MM2S source address, high word.
    pub const MM2S_SA_MSB: u64 = 0x1C;
    /// MM2S transfer length; writing it triggers the transfer.
    pub const MM2S_LENGTH: u64 = 0x28;

    /// S2MM control register.
    pub const S2MM_DMACR: u64 = 0x30;
    /// S2MM status register.
    pub const S2MM_DMASR: u64 = 0x34;
    /// S2MM destination address, low word.
    pub const S2MM_DA: u64 = 0x48;
    /// S2MM destination address, high word.
    pub const S2MM_DA_MSB: u64 = 0x4C;
    /// S2MM transfer length; writing it triggers the transfer.
    pub const S2MM_LENGTH: u64 = 0x58;

    /// Run/stop bit of the control registers.
    pub const DMACR_RS: u32 = 1 << 0;
    /// Engine halted bit of the status registers.
    pub const DMASR_HALTED: u32 = 1 << 0;
    /// Engine idle bit of the status registers.
    pub const DMASR_IDLE: u32 = 1 << 1;
}

/// How long a blocking DMA transfer may take before it is reported as hung.
const DMA_TIMEOUT: Duration = Duration::from_secs(1);

/// Split a bus address into the low/high register pair the DMA expects.
#[allow(clippy::cast_possible_truncation)]
const fn split_addr(addr: u64) -> (u32, u32) {
    (addr as u32, (addr >> 32) as u32)
}

/// Memory-mapped SoC fabric platform.
#[derive(Debug)]
pub struct AxiPlatform {
    mem: Arc<File>,
    config: PlatformConfig,
}

impl AxiPlatform {
    /// Open the physical-memory device of the fabric.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if the device node does not exist, or an
    /// I/O error if it cannot be opened read-write.
    pub fn open(config: &PlatformConfig) -> Result<Self> {
        if !config.mem_path.exists() {
            return Err(HalError::device_not_found(&config.mem_path));
        }

        let mem = File::options()
            .read(true)
            .write(true)
            .open(&config.mem_path)?;

        tracing::info!(mem = %config.mem_path.display(), "AXI-lite platform ready");

        Ok(Self {
            mem: Arc::new(mem),
            config: config.clone(),
        })
    }
}

impl Platform for AxiPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::AxiLite
    }

    fn reset(&self) -> Result<()> {
        // Reprogramming the fabric (bitstream load) is outside this crate;
        // the platform itself keeps no state to clear.
        tracing::info!("AXI-lite platform reset requested");
        Ok(())
    }

    fn accelerator(&self, addr: u64) -> Result<Arc<dyn Accelerator>> {
        let region = MappedRegion::map(&self.mem, addr, ACCEL_SPAN)?;
        tracing::debug!(addr = format_args!("{addr:#x}"), "accelerator window mapped");
        Ok(Arc::new(AxiAccelerator { region }))
    }

    fn data_mover(&self, addr: u64) -> Result<Arc<dyn DataMover>> {
        let regs = MappedRegion::map(&self.mem, addr, DMA_SPAN)?;
        let window = MappedRegion::map(&self.mem, self.config.buffer_base, self.config.buffer_span)?;
        tracing::debug!(
            addr = format_args!("{addr:#x}"),
            window = format_args!("{:#x}", self.config.buffer_base),
            "DMA engine mapped"
        );
        Ok(Arc::new(AxiDataMover {
            regs,
            window: Arc::new(window),
            cursor: Mutex::new(0),
        }))
    }
}

/// One AXI-lite accelerator control window.
#[derive(Debug)]
struct AxiAccelerator {
    region: MappedRegion,
}

impl AxiAccelerator {
    fn check_regs(&self, addr: u64, words: usize) -> Result<()> {
        if self.region.contains(addr, words * 4) {
            Ok(())
        } else {
            Err(HalError::register_io(
                addr,
                format!("{words} word access exceeds the control window"),
            ))
        }
    }
}

impl Accelerator for AxiAccelerator {
    fn start(&self, mode: StartMode) -> Result<()> {
        let value = match mode {
            StartMode::Once => ctrl::START_ONCE,
            StartMode::Continuous => ctrl::START_CONTINUOUS,
        };
        self.region.write32(ctrl::REG_CTRL, value);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.region.write32(ctrl::REG_CTRL, ctrl::STOP);
        Ok(())
    }

    fn wait_done(&self) -> Result<()> {
        poll_until_done(|| Ok(self.region.read32(ctrl::REG_CTRL)), DONE_TIMEOUT)
    }

    fn status(&self) -> DeviceState {
        decode_ctrl(self.region.read32(ctrl::REG_CTRL))
    }

    fn write_register(&self, addr: u64, data: &[u32]) -> Result<()> {
        self.check_regs(addr, data.len())?;
        for (i, word) in data.iter().enumerate() {
            self.region.write32(addr + (i as u64) * 4, *word);
        }
        Ok(())
    }

    fn read_register(&self, addr: u64, out: &mut [u32]) -> Result<()> {
        self.check_regs(addr, out.len())?;
        for (i, word) in out.iter_mut().enumerate() {
            *word = self.region.read32(addr + (i as u64) * 4);
        }
        Ok(())
    }
}

/// AXI DMA engine plus the reserved buffer window it moves data from.
#[derive(Debug)]
struct AxiDataMover {
    regs: MappedRegion,
    window: Arc<MappedRegion>,
    /// Bump cursor into the buffer window; allocations are never returned.
    cursor: Mutex<usize>,
}

impl AxiDataMover {
    fn poll_idle(&self, sr: u64) -> Result<()> {
        let deadline = std::time::Instant::now() + DMA_TIMEOUT;
        loop {
            let status = self.regs.read32(sr);
            if status & (dma::DMASR_IDLE | dma::DMASR_HALTED) != 0 {
                return Ok(());
            }
            if std::time::Instant::now() >= deadline {
                #[allow(clippy::cast_possible_truncation)]
                return Err(HalError::Timeout {
                    duration_ms: DMA_TIMEOUT.as_millis() as u64,
                });
            }
            std::thread::sleep(Duration::from_micros(10));
        }
    }

    fn device_range(buffer: &Arc<dyn DeviceBuffer>, size: usize, offset: usize) -> Result<u64> {
        check_range(buffer.len(), offset, size)?;
        let base = buffer.device_addr().ok_or_else(|| {
            HalError::invalid_parameter("buffer has no device address; not device-visible memory")
        })?;
        Ok(base + offset as u64)
    }
}

impl DataMover for AxiDataMover {
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
                    "buffer window exhausted: {size} bytes requested, {} free",
                    self.window.len().saturating_sub(offset)
                ))
            })?;
        *cursor = end;
        drop(cursor);

        tracing::debug!(size, ?kind, offset, "buffer allocated");

        Ok(Arc::new(AxiBuffer {
            window: Arc::clone(&self.window),
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
        let src = Self::device_range(buffer, size, offset)?;
        let length = u32::try_from(size)
            .map_err(|_| HalError::invalid_parameter("transfer larger than the DMA can address"))?;

        let (lo, hi) = split_addr(src);
        self.regs.write32(dma::MM2S_DMACR, dma::DMACR_RS);
        self.regs.write32(dma::MM2S_SA, lo);
        self.regs.write32(dma::MM2S_SA_MSB, hi);
        self.regs.write32(dma::MM2S_LENGTH, length);

        match mode {
            ExecMode::Blocking => self.poll_idle(dma::MM2S_DMASR),
            ExecMode::Deferred => Ok(()),
        }
    }

    fn download(
        &self,
        buffer: &Arc<dyn DeviceBuffer>,
        size: usize,
        offset: usize,
        mode: ExecMode,
    ) -> Result<()> {
        let dst = Self::device_range(buffer, size, offset)?;
        let length = u32::try_from(size)
            .map_err(|_| HalError::invalid_parameter("transfer larger than the DMA can address"))?;

        let (lo, hi) = split_addr(dst);
        self.regs.write32(dma::S2MM_DMACR, dma::DMACR_RS);
        self.regs.write32(dma::S2MM_DA, lo);
        self.regs.write32(dma::S2MM_DA_MSB, hi);
        self.regs.write32(dma::S2MM_LENGTH, length);

        match mode {
            ExecMode::Blocking => self.poll_idle(dma::S2MM_DMASR),
            ExecMode::Deferred => Ok(()),
        }
    }

    fn flush(&self, direction: SyncDirection) -> Result<()> {
        match direction {
            SyncDirection::HostToDevice => self.poll_idle(dma::MM2S_DMASR),
            SyncDirection::DeviceToHost => self.poll_idle(dma::S2MM_DMASR),
        }
    }

    fn status(&self) -> DeviceState {
        let busy = |sr: u64| {
            let status = self.regs.read32(sr);
            status & (dma::DMASR_IDLE | dma::DMASR_HALTED) == 0
        };
        if busy(dma::MM2S_DMASR) || busy(dma::S2MM_DMASR) {
            DeviceState::Running
        } else {
            DeviceState::Idle
        }
    }
}

/// Buffer carved from the reserved window, with a host staging mirror.
#[derive(Debug)]
struct AxiBuffer {
    window: Arc<MappedRegion>,
    /// Offset of this buffer inside the window.
    offset: u64,
    len: usize,
    host: Mutex<BytesMut>,
}

impl DeviceBuffer for AxiBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn device_addr(&self) -> Option<u64> {
        Some(self.window.base() + self.offset)
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
            SyncDirection::HostToDevice => self.window.write_bytes(self.offset, &host),
            SyncDirection::DeviceToHost => self.window.read_bytes(self.offset, &mut host),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::DeviceBufferExt;
    use std::io::Write;
    use std::os::unix::fs::FileExt;

    const MEM_LEN: u64 = 1024 * 1024;
    const DMA_ADDR: u64 = 0x2000;
    const BUF_BASE: u64 = 0x8_0000;

    fn scratch_platform(tag: &str) -> (std::path::PathBuf, AxiPlatform) {
        let path = std::env::temp_dir().join(format!("fabriq-axi-{tag}-{}", std::process::id()));
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.set_len(MEM_LEN).unwrap();
        file.flush().unwrap();

        let config = PlatformConfig {
            mem_path: path.clone(),
            buffer_base: BUF_BASE,
            buffer_span: 0x1000,
            ..PlatformConfig::default()
        };
        (path, AxiPlatform::open(&config).unwrap())
    }

    #[test]
    fn test_accelerator_control_protocol() {
        let (path, platform) = scratch_platform("accel");
        let accel = platform.accelerator(0).unwrap();

        accel.start(StartMode::Once).unwrap();
        assert_eq!(accel.status(), DeviceState::Running);

        accel.write_register(ctrl::REG_CTRL, &[ctrl::DONE]).unwrap();
        assert_eq!(accel.status(), DeviceState::Done);
        accel.wait_done().unwrap();

        accel.stop().unwrap();
        assert_eq!(accel.status(), DeviceState::Unknown);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_argument_register_roundtrip() {
        let (path, platform) = scratch_platform("regs");
        let accel = platform.accelerator(0).unwrap();

        accel.write_register(0x40, &[7, 8, 9]).unwrap();
        let mut out = [0u32; 3];
        accel.read_register(0x40, &mut out).unwrap();
        assert_eq!(out, [7, 8, 9]);

        // Past the end of the 64 KiB window.
        assert!(accel.write_register(0x1_0000, &[1]).is_err());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_buffer_staging_and_sync_roundtrip() {
        let (path, platform) = scratch_platform("buffer");
        let mover = platform.data_mover(DMA_ADDR).unwrap();

        let buffer = mover.alloc(64, MemoryKind::Dual).unwrap();
        assert_eq!(buffer.device_addr(), Some(BUF_BASE));

        let data: Vec<u32> = (0..16).collect();
        buffer.write_pod(0, &data).unwrap();
        buffer.sync(SyncDirection::HostToDevice).unwrap();

        // Clobber the staging side, then pull the device copy back.
        buffer.write_from(0, &[0u8; 64]).unwrap();
        buffer.sync(SyncDirection::DeviceToHost).unwrap();

        let mut out = vec![0u32; 16];
        buffer.read_pod(0, &mut out).unwrap();
        assert_eq!(out, data);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_attach_writes_device_address_argument() {
        let (path, platform) = scratch_platform("attach");
        let accel = platform.accelerator(0).unwrap();
        let mover = platform.data_mover(DMA_ADDR).unwrap();

        let buffer = mover.alloc(64, MemoryKind::Dual).unwrap();
        accel.attach(0x18, &buffer).unwrap();

        let mut arg = [0u32; 1];
        accel.read_register(0x18, &mut arg).unwrap();
        assert_eq!(u64::from(arg[0]), BUF_BASE);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_allocations_do_not_overlap() {
        let (path, platform) = scratch_platform("alloc");
        let mover = platform.data_mover(DMA_ADDR).unwrap();

        let a = mover.alloc(100, MemoryKind::Dual).unwrap();
        let b = mover.alloc(100, MemoryKind::Dual).unwrap();
        let a_addr = a.device_addr().unwrap();
        let b_addr = b.device_addr().unwrap();
        assert!(b_addr >= a_addr + 100);
        assert_eq!(b_addr % ALLOC_ALIGN as u64, 0);

        // A 4 KiB window cannot hold a third 4 KiB buffer.
        assert!(mover.alloc(0x1000, MemoryKind::Dual).is_err());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_upload_programs_the_dma_engine() {
        let (path, platform) = scratch_platform("dma");

        // Pre-seed both status registers as idle so blocking calls return.
        let file = File::options().read(true).write(true).open(&path).unwrap();
        file.write_at(&dma::DMASR_IDLE.to_le_bytes(), DMA_ADDR + dma::MM2S_DMASR)
            .unwrap();
        file.write_at(&dma::DMASR_IDLE.to_le_bytes(), DMA_ADDR + dma::S2MM_DMASR)
            .unwrap();

        let mover = platform.data_mover(DMA_ADDR).unwrap();
        let buffer = mover.alloc(256, MemoryKind::Dual).unwrap();

        mover.upload(&buffer, 256, 0, ExecMode::Blocking).unwrap();

        let mut sa = [0u8; 4];
        file.read_at(&mut sa, DMA_ADDR + dma::MM2S_SA).unwrap();
        assert_eq!(u64::from(u32::from_le_bytes(sa)), BUF_BASE);

        let mut length = [0u8; 4];
        file.read_at(&mut length, DMA_ADDR + dma::MM2S_LENGTH).unwrap();
        assert_eq!(u32::from_le_bytes(length), 256);

        assert_eq!(mover.status(), DeviceState::Idle);

        let _ = std::fs::remove_file(path);
    }
}
