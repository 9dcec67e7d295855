use accel_rt::rhi::{SUPPORTED_CHIPS, is_chip_supported};
use accel_rt::runtime::AllocParams;
use accel_rt::{AccelResult, Program, RuntimeConfig};

fn main() -> AccelResult<()> {
    println!("--- Accelerator Runtime Info ---");

    let config = RuntimeConfig::from_env();
    println!("Target chip: {}", config.chip);
    println!("Known chips: {}", SUPPORTED_CHIPS.join(", "));
    if !is_chip_supported(&config.chip) {
        println!("  (not in the known set, continuing anyway)");
    }

    let program = Program::new(config)?;
    if let Err(e) = program.materialize_runtime() {
        // Memory still works through the host pool; kernels don't.
        eprintln!("Backend bring-up failed: {e}");
    }

    let device = program.device();
    println!("\n--- Device {} ---", device.id());
    println!("Initialized:  {}", device.is_initialized());
    println!("Total memory: {} MB", device.total_memory()? / 1024 / 1024);

    let alloc = device.allocate_memory(AllocParams::new(1000).host_read())?;
    let info = device.alloc_info(alloc)?;
    println!(
        "Test allocation #{}: {} bytes, {:?} at {:p}",
        alloc.alloc_id(),
        info.size,
        info.kind,
        info.ptr
    );
    device.dealloc_memory(alloc)?;

    program.finalize()
}
