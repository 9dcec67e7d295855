use accel_rt::rhi::GenericDevice;
use accel_rt::runtime::{AllocParams, KernelArg, OffloadedTask};
use accel_rt::{AccelResult, Program, RuntimeConfig};

const N: usize = 1000;

fn main() -> AccelResult<()> {
    let config = RuntimeConfig::builder()
        .chip("generic")
        .generic_memory_bytes(64 * 1024 * 1024)
        .sync_after_launch(true)
        .build()?;
    let program = Program::new(config)?;

    // args[0] is an array of N u32, one element per loop iteration.
    let ctx = GenericDevice::new(program.config().generic_memory_bytes).with_kernel(
        "fill_index",
        |inv| {
            let i = inv.global_id() as usize;
            if i < N {
                unsafe { inv.args[0].cast::<u32>().add(i).write(i as u32 * 2) };
            }
        },
    );
    program.materialize_with(Box::new(ctx))?;

    let device = program.device();
    let size = N * size_of::<u32>();
    let buf = device.allocate_memory(AllocParams::new(size))?;
    let arg = KernelArg::new(device.memory_addr(buf.into())?, size);

    let kernel = program.compile(
        "fill",
        &[OffloadedTask::range_for("fill_index", 0, N as i64)],
        vec![arg],
    )?;
    for task in &kernel.tasks {
        println!(
            "Task {}: grid={} block={}",
            task.name, task.grid_dim, task.block_dim
        );
    }
    program.launch(&kernel)?;

    let mut out = vec![0u8; size];
    device.readback_data(buf.into(), &mut out)?;
    let values: Vec<u32> = out
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    println!("First values: {:?}", &values[..8]);
    println!("Last value:   {}", values[N - 1]);

    device.dealloc_memory(buf)?;
    program.finalize()
}
