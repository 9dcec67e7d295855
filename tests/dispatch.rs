mod common;

use accel_rt::runtime::dispatch::configurator::bounded_grid_dim;
use accel_rt::runtime::{AllocParams, KernelArg, OffloadedTask};
use accel_rt::{AccelError, Program, RuntimeConfig};
use common::{Event, SentinelDevice, launches};

fn program(sync: bool) -> (Program, common::EventLog) {
    let config = RuntimeConfig::builder()
        .chip("generic")
        .saturating_grid_dim(512)
        .sync_after_launch(sync)
        .build()
        .unwrap();
    let program = Program::new(config).unwrap();
    let (ctx, events) = SentinelDevice::new(1 << 20);
    program.materialize_with(Box::new(ctx)).unwrap();
    (program, events)
}

#[test]
fn bounded_range_grid_is_exact_cover_then_capped() {
    assert_eq!(bounded_grid_dim(0, 1000, 128, 1000), 8);
    assert_eq!(bounded_grid_dim(0, 1000, 128, 4), 4);

    let (prog, _events) = program(false);
    let kernel = prog
        .compile(
            "k",
            &[
                OffloadedTask::range_for("covered", 0, 1000).with_grid_dim(1000),
                OffloadedTask::range_for("capped", 0, 1000).with_grid_dim(4),
            ],
            Vec::new(),
        )
        .unwrap();
    assert_eq!(kernel.tasks[0].grid_dim, 8);
    assert_eq!(kernel.tasks[1].grid_dim, 4);
    assert!(kernel.tasks.iter().all(|t| t.block_dim == 128));
}

#[test]
fn gc_expands_into_three_ordered_phases() {
    let (prog, _events) = program(false);
    let kernel = prog
        .compile("gc", &[OffloadedTask::gc("snode3")], Vec::new())
        .unwrap();
    let shape: Vec<_> = kernel
        .tasks
        .iter()
        .map(|t| (t.name.as_str(), t.grid_dim, t.block_dim))
        .collect();
    assert_eq!(
        shape,
        [
            ("snode3_gather_list", 512, 64),
            ("snode3_reinit_lists", 1, 1),
            ("snode3_zero_fill", 512, 64),
        ]
    );
}

#[test]
fn gc_ignores_task_hints() {
    let (prog, _events) = program(false);
    let kernel = prog
        .compile(
            "gc",
            &[OffloadedTask::gc("g").with_block_dim(7).with_grid_dim(3)],
            Vec::new(),
        )
        .unwrap();
    assert_eq!(kernel.tasks[1].grid_dim, 1);
    assert_eq!(kernel.tasks[0].block_dim, 64);
}

#[test]
fn launches_follow_compiled_order_and_share_args() {
    let (prog, events) = program(false);
    let buf = prog
        .device()
        .allocate_memory(AllocParams::new(64))
        .unwrap();
    let addr = prog.device().memory_addr(buf.into()).unwrap();

    let kernel = prog
        .compile(
            "step",
            &[
                OffloadedTask::listgen("listgen"),
                OffloadedTask::struct_for("body"),
                OffloadedTask::serial("tail"),
            ],
            vec![KernelArg::new(addr, 64), KernelArg::new(addr, 32)],
        )
        .unwrap();
    prog.launch(&kernel).unwrap();

    assert_eq!(
        launches(&events),
        vec![
            ("listgen".to_string(), 256, 128),
            ("body".to_string(), 1024, 128),
            ("tail".to_string(), 1, 1),
        ]
    );
    let log = events.lock();
    assert!(log.iter().all(|e| match e {
        Event::Launch { args, .. } => *args == 2,
        _ => true,
    }));
    assert!(!log.contains(&Event::Synchronize));
}

#[test]
fn synchronous_config_waits_after_last_task() {
    let (prog, events) = program(true);
    let kernel = prog
        .compile(
            "k",
            &[OffloadedTask::serial("a"), OffloadedTask::serial("b")],
            Vec::new(),
        )
        .unwrap();
    prog.launch(&kernel).unwrap();
    prog.launch(&kernel).unwrap();

    let log = events.lock();
    let syncs: Vec<_> = log
        .iter()
        .enumerate()
        .filter(|(_, e)| **e == Event::Synchronize)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(syncs, vec![2, 5]);
}

#[test]
fn launch_before_materialize_is_not_initialized() {
    let prog = Program::new(RuntimeConfig::default()).unwrap();
    let kernel = prog
        .compile("k", &[OffloadedTask::serial("a")], Vec::new())
        .unwrap();
    assert!(matches!(
        prog.launch(&kernel),
        Err(AccelError::NotInitialized(_))
    ));
}

#[test]
fn zero_block_hint_never_reaches_the_device() {
    let (prog, events) = program(false);
    let err = prog
        .compile(
            "k",
            &[
                OffloadedTask::serial("ok"),
                OffloadedTask::runtime_range_for("bad").with_block_dim(0),
            ],
            Vec::new(),
        )
        .unwrap_err();
    assert!(matches!(err, AccelError::InvalidDispatch(_)));
    assert!(launches(&events).is_empty());
}

#[test]
fn unwired_chip_fails_bring_up() {
    let config = RuntimeConfig::builder().chip("mlu590").build().unwrap();
    let prog = Program::new(config).unwrap();
    assert!(matches!(
        prog.materialize_runtime(),
        Err(AccelError::NotImplemented(_))
    ));
    assert!(!prog.is_initialized());
    assert_eq!(prog.target_chip(), "mlu590");
}
