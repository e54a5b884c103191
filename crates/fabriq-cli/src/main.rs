//! `fabriq` — command-line interface for FPGA accelerator platforms.
//!
//! ```text
//! USAGE:
//!   fabriq discover                  List PCIe card device nodes
//!   fabriq probe <platform>          Open a platform and report its state
//!   fabriq stream-demo [--ops N]     Exercise the execution stream on the host
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fabriq_hal::{
    create_platform, Accelerator, DeviceState, OpId, Platform, PlatformConfig, PlatformKind,
};

#[derive(Parser)]
#[command(name = "fabriq", about = "FPGA accelerator platform CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List PCIe card device nodes present on this host.
    Discover {
        /// Device node prefix to scan.
        #[arg(long, default_value = "/dev/fabriq")]
        prefix: String,
    },
    /// Open a platform and report accelerator state at one address.
    Probe {
        /// Platform to open: "axi" or "pcie".
        platform: String,
        /// Control-window base address of the accelerator.
        #[arg(long, value_parser = parse_hex, default_value = "0xa0000000")]
        addr: u64,
        /// Override the register/device path for the chosen platform.
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Run a host-only execution stream demonstration.
    StreamDemo {
        /// Number of operations to submit.
        #[arg(long, default_value_t = 16)]
        ops: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Discover { prefix } => cmd_discover(&prefix),
        Cmd::Probe { platform, addr, path } => cmd_probe(&platform, addr, path),
        Cmd::StreamDemo { ops } => cmd_stream_demo(ops),
    }
}

fn cmd_discover(prefix: &str) -> Result<()> {
    let nodes = fabriq_hal::platforms::discover_devices(prefix);
    if nodes.is_empty() {
        println!("No device nodes matching {prefix}*");
        return Ok(());
    }

    println!("Card device nodes: {}", nodes.len());
    for node in nodes {
        println!("  {}", node.display());
    }
    Ok(())
}

fn cmd_probe(platform: &str, addr: u64, path: Option<PathBuf>) -> Result<()> {
    let kind = match platform {
        "axi" => PlatformKind::AxiLite,
        "pcie" => PlatformKind::PcieKernel,
        other => bail!("unknown platform {other:?}; expected \"axi\" or \"pcie\""),
    };

    let mut config = PlatformConfig::default();
    if let Some(path) = path {
        match kind {
            PlatformKind::AxiLite => config.mem_path = path,
            PlatformKind::PcieKernel => config.device_path = path,
        }
    }

    let platform = create_platform(kind, &config)
        .with_context(|| format!("opening {kind} platform"))?;

    let accel = platform
        .accelerator(addr)
        .with_context(|| format!("binding control window at {addr:#x}"))?;

    let state = accel.status();
    println!("{kind} accelerator @ {addr:#x}: {state:?}");
    if state == DeviceState::Error {
        bail!("control window is not readable");
    }
    Ok(())
}

fn cmd_stream_demo(ops: u64) -> Result<()> {
    if ops == 0 {
        bail!("--ops must be at least 1");
    }

    let stream = fabriq_hal::ExecutionStream::new("demo")?;
    let completed = Arc::new(AtomicUsize::new(0));

    println!("Submitting {ops} operations...");
    for index in 0..ops {
        let completed = Arc::clone(&completed);
        stream.submit_fn(move || {
            std::thread::sleep(std::time::Duration::from_millis(2));
            completed.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(index, "demo operation ran");
            Ok(())
        });
    }

    let midpoint = OpId::new(ops / 2);
    stream.sync_to(midpoint)?;
    println!(
        "After sync_to({midpoint}): {} complete",
        completed.load(Ordering::SeqCst)
    );

    stream.sync()?;
    println!("After sync(): {} complete", completed.load(Ordering::SeqCst));

    match stream.last_error() {
        Some(err) => bail!("stream recorded an error: {err}"),
        None => println!("No errors recorded."),
    }
    Ok(())
}

fn parse_hex(value: &str) -> std::result::Result<u64, String> {
    let trimmed = value.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(trimmed, 16).map_err(|e| format!("invalid address {value:?}: {e}"))
}
