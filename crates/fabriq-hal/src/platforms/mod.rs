//! Platform implementations
//!
//! Two backends are available:
//! - **axi**: memory-mapped AXI-lite fabric on an SoC, registers and buffer
//!   windows reached through `/dev/mem` mappings.
//! - **pcie**: kernel-driver PCIe card, registers and DMA windows reached
//!   through a char device with positioned reads and writes.
//!
//! Both are thin glue over the I/O primitives; the execution-stream core is
//! agnostic to which one produced a facade.

pub mod axi;
pub mod pcie;

pub use axi::AxiPlatform;
pub use pcie::{discover_devices, PciePlatform};
