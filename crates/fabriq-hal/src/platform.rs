//! Platform abstraction
//!
//! A [`Platform`] is the factory binding the facades to one concrete
//! backend: accelerators and data movers come out of it already wired to
//! the right fabric. Execution streams are platform-independent, so the
//! trait provides them directly.

use std::path::PathBuf;
use std::sync::Arc;

use crate::accelerator::Accelerator;
use crate::datamover::DataMover;
use crate::error::Result;
use crate::exec::{create_graph, ExecutionGraph, GraphKind, StreamConfig};

/// Supported platform families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    /// Memory-mapped SoC fabric: AXI-lite designs reached through `/dev/mem`.
    AxiLite,

    /// PCIe accelerator card reached through a kernel driver's char device.
    PcieKernel,
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AxiLite => write!(f, "AXI-lite fabric"),
            Self::PcieKernel => write!(f, "PCIe kernel card"),
        }
    }
}

/// Construction-time platform configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Bitstream or xclbin path. Recorded for diagnostics; programming the
    /// fabric is outside this crate.
    pub design_file: Option<PathBuf>,

    /// Physical-memory device node for the AXI-lite fabric. A regular file
    /// can stand in for it in tests.
    pub mem_path: PathBuf,

    /// Char device of the PCIe kernel driver.
    pub device_path: PathBuf,

    /// Base address of the reserved window buffers are carved from.
    pub buffer_base: u64,

    /// Size of the reserved buffer window in bytes.
    pub buffer_span: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            design_file: None,
            mem_path: PathBuf::from("/dev/mem"),
            device_path: PathBuf::from("/dev/fabriq0"),
            buffer_base: 0x7000_0000,
            buffer_span: 16 * 1024 * 1024,
        }
    }
}

/// Factory for accelerators, data movers and execution streams bound to one
/// backend.
pub trait Platform: Send + Sync {
    /// Which platform family this is.
    fn kind(&self) -> PlatformKind;

    /// Return the platform to its initial state.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying device rejects the reset.
    fn reset(&self) -> Result<()>;

    /// Accelerator bound to the control window at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the window cannot be reached.
    fn accelerator(&self, addr: u64) -> Result<Arc<dyn Accelerator>>;

    /// Data mover bound to the transfer engine at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine window cannot be reached.
    fn data_mover(&self, addr: u64) -> Result<Arc<dyn DataMover>>;

    /// Construct an execution graph of the requested flavour.
    ///
    /// The name is a diagnostic label only and has no effect on scheduling.
    /// Streams are independent schedulers; ordering across two streams is
    /// unspecified.
    ///
    /// # Errors
    ///
    /// Returns `NotImplemented` for graph flavours other than streams.
    fn execution_graph(
        &self,
        name: &str,
        kind: GraphKind,
        mut config: StreamConfig,
    ) -> Result<Arc<dyn ExecutionGraph>> {
        config.name = name.to_string();
        create_graph(kind, config)
    }

    /// Construct a queue-based execution stream with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream worker cannot be spawned.
    fn execution_stream(&self, name: &str) -> Result<Arc<dyn ExecutionGraph>> {
        self.execution_graph(name, GraphKind::Stream, StreamConfig::default())
    }
}

/// Construct a platform of the requested family.
///
/// # Errors
///
/// Returns an error if the backing device node cannot be opened.
pub fn create_platform(kind: PlatformKind, config: &PlatformConfig) -> Result<Arc<dyn Platform>> {
    use crate::platforms::axi::AxiPlatform;
    use crate::platforms::pcie::PciePlatform;

    match kind {
        PlatformKind::AxiLite => {
            tracing::info!(mem = %config.mem_path.display(), "opening AXI-lite platform");
            Ok(Arc::new(AxiPlatform::open(config)?))
        }
        PlatformKind::PcieKernel => {
            tracing::info!(device = %config.device_path.display(), "opening PCIe kernel platform");
            Ok(Arc::new(PciePlatform::open(config)?))
        }
    }
}
