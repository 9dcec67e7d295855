#![allow(dead_code)]

use accel_rt::AccelResult;
use accel_rt::rhi::DeviceContext;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ptr::{self, NonNull};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Free(usize),
    Launch {
        name: String,
        grid_dim: u32,
        block_dim: u32,
        args: usize,
    },
    Synchronize,
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// Heap-backed context that records every free, launch and sync it sees.
#[derive(Debug)]
pub struct SentinelDevice {
    events: EventLog,
    regions: HashMap<usize, Box<[u8]>>,
    capacity: usize,
    used: usize,
}

impl SentinelDevice {
    pub fn new(capacity: usize) -> (Self, EventLog) {
        let events = EventLog::default();
        let dev = Self {
            events: events.clone(),
            regions: HashMap::new(),
            capacity,
            used: 0,
        };
        (dev, events)
    }
}

impl DeviceContext for SentinelDevice {
    fn chip(&self) -> &str {
        "generic"
    }

    fn initialize(&mut self) -> AccelResult<()> {
        Ok(())
    }

    fn allocate(&mut self, size: usize, _managed: bool) -> AccelResult<Option<NonNull<u8>>> {
        if self
            .used
            .checked_add(size)
            .is_none_or(|total| total > self.capacity)
        {
            return Ok(None);
        }
        // Poisoned so that a missing zero-fill is visible.
        let mut region = vec![0xa5u8; size.max(1)].into_boxed_slice();
        let ptr = region.as_mut_ptr();
        self.regions.insert(ptr as usize, region);
        self.used += size;
        Ok(NonNull::new(ptr))
    }

    fn free(&mut self, ptr: NonNull<u8>) -> AccelResult<()> {
        let addr = ptr.as_ptr() as usize;
        self.events.lock().push(Event::Free(addr));
        if let Some(region) = self.regions.remove(&addr) {
            self.used -= region.len().min(self.used);
        }
        Ok(())
    }

    unsafe fn copy_h2d(&mut self, dst: *mut u8, src: *const u8, size: usize) -> AccelResult<()> {
        unsafe { ptr::copy(src, dst, size) };
        Ok(())
    }

    unsafe fn copy_d2h(&mut self, dst: *mut u8, src: *const u8, size: usize) -> AccelResult<()> {
        unsafe { ptr::copy(src, dst, size) };
        Ok(())
    }

    unsafe fn copy_d2d(&mut self, dst: *mut u8, src: *const u8, size: usize) -> AccelResult<()> {
        unsafe { ptr::copy(src, dst, size) };
        Ok(())
    }

    unsafe fn memset(&mut self, ptr: *mut u8, value: u8, size: usize) -> AccelResult<()> {
        unsafe { ptr::write_bytes(ptr, value, size) };
        Ok(())
    }

    fn synchronize(&mut self) -> AccelResult<()> {
        self.events.lock().push(Event::Synchronize);
        Ok(())
    }

    fn total_memory(&self) -> AccelResult<usize> {
        Ok(self.capacity)
    }

    fn launch(
        &mut self,
        name: &str,
        args: &[*mut u8],
        grid_dim: u32,
        block_dim: u32,
    ) -> AccelResult<()> {
        self.events.lock().push(Event::Launch {
            name: name.to_string(),
            grid_dim,
            block_dim,
            args: args.len(),
        });
        Ok(())
    }
}

pub fn frees(events: &EventLog) -> Vec<usize> {
    events
        .lock()
        .iter()
        .filter_map(|e| match e {
            Event::Free(addr) => Some(*addr),
            _ => None,
        })
        .collect()
}

pub fn launches(events: &EventLog) -> Vec<(String, u32, u32)> {
    events
        .lock()
        .iter()
        .filter_map(|e| match e {
            Event::Launch {
                name,
                grid_dim,
                block_dim,
                ..
            } => Some((name.clone(), *grid_dim, *block_dim)),
            _ => None,
        })
        .collect()
}
