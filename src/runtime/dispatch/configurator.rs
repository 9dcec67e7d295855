#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use crate::config::RuntimeConfig;
use crate::error::{AccelError, AccelResult};
use crate::runtime::dispatch::{OffloadedTask, RangeBound, TaskDescriptor, TaskType};
use crate::utils::div_ceil;

/// Entry-point suffixes of the garbage collection phases, in launch order.
pub const GC_PHASES: [&str; 3] = ["gather_list", "reinit_lists", "zero_fill"];

/// Derives launch geometry for offloaded tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfigurator {
    block_dim: u32,
    grid_dim: u32,
    saturating_grid_dim: u32,
    compute_unit_count: u32,
    listgen_grid_multiplier: u32,
    gc_block_dim: u32,
}

impl DispatchConfigurator {
    #[must_use]
    pub const fn new(config: &RuntimeConfig) -> Self {
        Self {
            block_dim: config.default_block_dim,
            grid_dim: config.default_grid_dim,
            saturating_grid_dim: config.saturating_grid_dim,
            compute_unit_count: config.compute_unit_count,
            listgen_grid_multiplier: config.listgen_grid_multiplier,
            gc_block_dim: config.gc_block_dim,
        }
    }

    /// Geometry for one task. Garbage collection yields three descriptors, everything else one.
    ///
    /// # Errors
    /// `InvalidDispatch` if any resulting descriptor has a zero dimension.
    pub fn configure(&self, task: &OffloadedTask) -> AccelResult<Vec<TaskDescriptor>> {
        let block_dim = task.block_dim.unwrap_or(self.block_dim);
        let grid_dim = task.grid_dim.unwrap_or(self.grid_dim);

        let descriptors = match task.task_type {
            TaskType::Gc => self.gc_phases(&task.name),
            TaskType::Serial => vec![TaskDescriptor::new(&task.name, 1, 1)],
            TaskType::RangeFor {
                begin: RangeBound::Const(begin),
                end: RangeBound::Const(end),
            } => {
                let grid = bounded_grid_dim(begin, end, block_dim, grid_dim);
                vec![TaskDescriptor::new(&task.name, grid, block_dim)]
            }
            TaskType::RangeFor { .. } | TaskType::StructFor | TaskType::MeshFor => {
                vec![TaskDescriptor::new(&task.name, grid_dim, block_dim)]
            }
            TaskType::ListGen => {
                let grid = self
                    .compute_unit_count
                    .checked_mul(self.listgen_grid_multiplier)
                    .ok_or_else(|| {
                        AccelError::InvalidDispatch(format!(
                            "list generation grid for '{}' overflows",
                            task.name
                        ))
                    })?;
                vec![TaskDescriptor::new(&task.name, grid, block_dim)]
            }
        };

        for desc in &descriptors {
            desc.validate()?;
            log::trace!(
                "Configured {} ({:?}): grid={} block={}",
                desc.name,
                task.task_type,
                desc.grid_dim,
                desc.block_dim
            );
        }
        Ok(descriptors)
    }

    /// Geometry for a kernel's tasks, flattened in program order.
    ///
    /// # Errors
    /// The first [`DispatchConfigurator::configure`] failure.
    pub fn configure_all(&self, tasks: &[OffloadedTask]) -> AccelResult<Vec<TaskDescriptor>> {
        let mut out = Vec::with_capacity(tasks.len());
        for task in tasks {
            out.extend(self.configure(task)?);
        }
        Ok(out)
    }

    fn gc_phases(&self, name: &str) -> Vec<TaskDescriptor> {
        let [gather, reinit, zero] = GC_PHASES;
        vec![
            TaskDescriptor::new(
                format!("{name}_{gather}"),
                self.saturating_grid_dim,
                self.gc_block_dim,
            ),
            // Single-threaded so it cannot race the gather readers.
            TaskDescriptor::new(format!("{name}_{reinit}"), 1, 1),
            TaskDescriptor::new(
                format!("{name}_{zero}"),
                self.saturating_grid_dim,
                self.gc_block_dim,
            ),
        ]
    }
}

/// Blocks needed to cover `[begin, end)`, at least one and at most `max_grid`.
///
/// Iterations beyond `max_grid * block_dim` are left to the device-side loop.
/// A zero `block_dim` or `max_grid` yields 0 so validation can reject it.
#[must_use]
pub fn bounded_grid_dim(begin: i64, end: i64, block_dim: u32, max_grid: u32) -> u32 {
    if block_dim == 0 {
        return 0;
    }
    let iterations = end.saturating_sub(begin).max(0) as u64;
    let blocks = div_ceil(iterations, u64::from(block_dim)).max(1);
    blocks.min(u64::from(max_grid)) as u32
}
