//! Task shapes handed over by the compiler, and the launch geometry derived from them.

pub mod configurator;

use crate::error::{AccelError, AccelResult};

pub use configurator::DispatchConfigurator;

/// One end of a range-for loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    /// Known at compile time.
    Const(i64),
    /// Only known once the kernel runs.
    Runtime,
}

/// Shape of an offloaded task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Serial,
    RangeFor { begin: RangeBound, end: RangeBound },
    StructFor,
    MeshFor,
    ListGen,
    /// Garbage collection; expands into three phases.
    Gc,
}

/// A task as produced by the compiler, before geometry is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadedTask {
    pub name: String,
    pub task_type: TaskType,
    /// Overrides the configured block size.
    pub block_dim: Option<u32>,
    /// Overrides the configured grid size (the ceiling, for bounded ranges).
    pub grid_dim: Option<u32>,
}

impl OffloadedTask {
    #[must_use]
    pub fn new<S: Into<String>>(name: S, task_type: TaskType) -> Self {
        Self {
            name: name.into(),
            task_type,
            block_dim: None,
            grid_dim: None,
        }
    }

    #[must_use]
    pub fn serial<S: Into<String>>(name: S) -> Self {
        Self::new(name, TaskType::Serial)
    }

    /// Range-for with both bounds known at compile time.
    #[must_use]
    pub fn range_for<S: Into<String>>(name: S, begin: i64, end: i64) -> Self {
        Self::new(
            name,
            TaskType::RangeFor {
                begin: RangeBound::Const(begin),
                end: RangeBound::Const(end),
            },
        )
    }

    /// Range-for whose bounds are only resolved at launch.
    #[must_use]
    pub fn runtime_range_for<S: Into<String>>(name: S) -> Self {
        Self::new(
            name,
            TaskType::RangeFor {
                begin: RangeBound::Runtime,
                end: RangeBound::Runtime,
            },
        )
    }

    #[must_use]
    pub fn struct_for<S: Into<String>>(name: S) -> Self {
        Self::new(name, TaskType::StructFor)
    }

    #[must_use]
    pub fn mesh_for<S: Into<String>>(name: S) -> Self {
        Self::new(name, TaskType::MeshFor)
    }

    #[must_use]
    pub fn listgen<S: Into<String>>(name: S) -> Self {
        Self::new(name, TaskType::ListGen)
    }

    #[must_use]
    pub fn gc<S: Into<String>>(name: S) -> Self {
        Self::new(name, TaskType::Gc)
    }

    #[must_use]
    pub const fn with_block_dim(mut self, dim: u32) -> Self {
        self.block_dim = Some(dim);
        self
    }

    #[must_use]
    pub const fn with_grid_dim(mut self, dim: u32) -> Self {
        self.grid_dim = Some(dim);
        self
    }
}

/// One schedulable unit of device work with fixed geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// Compiled entry point to launch.
    pub name: String,
    pub grid_dim: u32,
    pub block_dim: u32,
}

impl TaskDescriptor {
    #[must_use]
    pub fn new<S: Into<String>>(name: S, grid_dim: u32, block_dim: u32) -> Self {
        Self {
            name: name.into(),
            grid_dim,
            block_dim,
        }
    }

    /// A descriptor is complete once it names an entry point and both dimensions are nonzero.
    ///
    /// # Errors
    /// `InvalidDispatch` otherwise.
    pub fn validate(&self) -> AccelResult<()> {
        if self.name.is_empty() {
            return Err(AccelError::InvalidDispatch(
                "task descriptor without an entry point".to_string(),
            ));
        }
        if self.grid_dim == 0 || self.block_dim == 0 {
            return Err(AccelError::InvalidDispatch(format!(
                "task '{}' has degenerate geometry grid={} block={}",
                self.name, self.grid_dim, self.block_dim
            )));
        }
        Ok(())
    }
}

/// Resolved kernel argument: a raw address into an allocated buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelArg {
    pub ptr: *mut u8,
    pub size: usize,
}

impl KernelArg {
    #[must_use]
    pub const fn new(ptr: *mut u8, size: usize) -> Self {
        Self { ptr, size }
    }
}

/// A kernel ready to launch: ordered tasks plus the argument list they share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledKernel {
    pub name: String,
    pub tasks: Vec<TaskDescriptor>,
    pub args: Vec<KernelArg>,
}

impl CompiledKernel {
    #[must_use]
    pub fn new<S: Into<String>>(name: S, tasks: Vec<TaskDescriptor>, args: Vec<KernelArg>) -> Self {
        Self {
            name: name.into(),
            tasks,
            args,
        }
    }

    /// The argument array passed to every launch of this kernel.
    #[must_use]
    pub fn arg_pointers(&self) -> Vec<*mut u8> {
        self.args.iter().map(|arg| arg.ptr).collect()
    }
}
