//! Mock 设备（用于无真实 PLC 环境的 demo/单测）。
//!
//! 行为约定：
//! - 持有一份 64 KiB 内存镜像，`poke`/`set_bit` 直接修改
//! - 与 `fail_range` 登记区间有交集的读取 → `DriverError::Comm`
//! - 越过镜像末尾的读取 → `DriverError::Comm`
//! - 记录每次读取的区间，便于断言批次/轮询行为

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{DeviceMemoryPort, DriverError, DriverFuture};
use crate::monitor::core::model::MEMORY_IMAGE_SIZE;
use crate::monitor::core::plan::AddressRange;

#[derive(Debug)]
pub struct MockDevice {
    memory: Mutex<Vec<u8>>,
    failing: Mutex<Vec<AddressRange>>,
    read_log: Mutex<Vec<AddressRange>>,
    reads: AtomicUsize,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            memory: Mutex::new(vec![0; MEMORY_IMAGE_SIZE]),
            failing: Mutex::new(Vec::new()),
            read_log: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn poke(&self, address: u32, bytes: &[u8]) {
        let mut memory = self.memory.lock();
        let start = (address as usize).min(memory.len());
        let end = (start + bytes.len()).min(memory.len());
        memory[start..end].copy_from_slice(&bytes[..end - start]);
    }

    pub fn set_bit(&self, address: u32, bit: u8, value: bool) {
        let mut memory = self.memory.lock();
        if let Some(byte) = memory.get_mut(address as usize) {
            let mask = 1u8 << (bit & 7);
            if value {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
    }

    pub fn fail_range(&self, start: u32, size: u32) {
        self.failing.lock().push(AddressRange::new(start, size));
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn take_read_log(&self) -> Vec<AddressRange> {
        std::mem::take(&mut *self.read_log.lock())
    }
}

impl DeviceMemoryPort for MockDevice {
    fn read_memory<'a>(&'a self, address: u32, size: u32) -> DriverFuture<'a> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let requested = AddressRange::new(address, size);
            self.read_log.lock().push(requested);

            let failing = self
                .failing
                .lock()
                .iter()
                .any(|r| r.start < requested.end() && requested.start < r.end());
            if failing {
                return Err(DriverError::Comm {
                    message: format!("mock read failure at {address}+{size}"),
                });
            }

            let memory = self.memory.lock();
            let start = address as usize;
            let end = start + size as usize;
            match memory.get(start..end) {
                Some(bytes) => Ok(bytes.to_vec()),
                None => Err(DriverError::Comm {
                    message: format!("read beyond device memory: {address}+{size}"),
                }),
            }
        })
    }
}
