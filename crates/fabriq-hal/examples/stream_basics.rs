//! Execution stream walkthrough
//!
//! Submits a handful of operations, synchronizes to one in the middle, then
//! drains the whole stream. Runs entirely on the host; no hardware needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fabriq_hal::exec::{ExecutionStream, OpId};
use fabriq_hal::Result;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("fabriq_hal=debug")
        .init();

    let stream = ExecutionStream::new("walkthrough")?;
    let completed = Arc::new(AtomicUsize::new(0));

    println!("Submitting 5 operations...");
    let mut last = OpId::new(0);
    for index in 0..5 {
        let completed = Arc::clone(&completed);
        last = stream.submit_fn(move || {
            std::thread::sleep(Duration::from_millis(10));
            completed.fetch_add(1, Ordering::SeqCst);
            println!("  operation {index} done");
            Ok(())
        });
    }

    // Wait for the third operation only; 3 and 4 may still be pending.
    stream.sync_to(OpId::new(2))?;
    println!(
        "After sync_to(2): {} operations complete",
        completed.load(Ordering::SeqCst)
    );

    // Now drain everything submitted so far.
    stream.sync()?;
    println!(
        "After sync(): {} operations complete (last id {last})",
        completed.load(Ordering::SeqCst)
    );

    match stream.last_error() {
        Some(err) => println!("stream recorded an error: {err}"),
        None => println!("no errors recorded"),
    }

    Ok(())
}
