//! Hardware abstraction layer for FPGA accelerator designs.
//!
//! One API over two very different attachment models: memory-mapped SoC
//! fabrics reached through `/dev/mem`, and PCIe cards reached through a
//! kernel driver's char device. On top of both sits an asynchronous
//! execution-graph layer that serializes device work on a dedicated thread.
//!
//! # Platform hierarchy
//!
//! ```text
//! SoC / embedded:
//!   AxiPlatform  — /dev/mem mmap, AXI-lite control + AXI DMA transfers
//!
//! Data-center cards:
//!   PciePlatform — kernel char device, positioned register and memory I/O
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use fabriq_hal::prelude::*;
//!
//! # fn main() -> fabriq_hal::Result<()> {
//! let config = PlatformConfig::default();
//! let platform = create_platform(PlatformKind::AxiLite, &config)?;
//!
//! let accel = platform.accelerator(0xA000_0000)?;
//! let graph = platform.execution_stream("inference")?;
//!
//! accel.start_on(&*graph, StartMode::Once);
//! accel.wait_done_on(&*graph);
//! graph.sync()?;
//! # Ok(())
//! # }
//! ```
//!
//! Work submitted to a graph runs strictly in submission order; `sync`
//! blocks the caller until everything submitted so far has executed. A
//! failing operation never stops the graph — it is recorded and readable
//! through [`ExecutionGraph::last_error`].

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]

mod accelerator;
mod datamover;
mod error;
pub mod exec;
pub mod io;
mod memory;
pub mod mmio;
mod platform;
pub mod platforms;

pub use accelerator::{decode_ctrl, Accelerator, DeviceState, StartMode};
pub use datamover::{DataMover, ExecMode};
pub use error::{HalError, Result};
pub use exec::{
    create_graph, ExecutionGraph, ExecutionGraphExt, ExecutionStream, GraphKind, OpId,
    QueuedAccelerator, QueuedBuffer, QueuedDataMover, StreamConfig,
};
pub use memory::{DeviceBuffer, DeviceBufferExt, MemoryKind, SyncDirection};
pub use platform::{create_platform, Platform, PlatformConfig, PlatformKind};
pub use platforms::{AxiPlatform, PciePlatform};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        create_platform, Accelerator, DataMover, DeviceBuffer, DeviceBufferExt, DeviceState,
        ExecMode, ExecutionGraph, ExecutionGraphExt, GraphKind, HalError, MemoryKind, Platform,
        PlatformConfig, PlatformKind, QueuedAccelerator, QueuedBuffer, QueuedDataMover, Result,
        StartMode, StreamConfig, SyncDirection,
    };
}
