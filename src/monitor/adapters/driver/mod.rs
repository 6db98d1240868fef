//! 设备内存端口（driver）模块。
//!
//! 传输层（串口/TCP、协议帧）在外部实现；本 crate 只消费 `read_memory`。

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

pub mod mock;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("timeout")]
    Timeout,

    #[error("device not connected")]
    Disconnected,

    #[error("comm error: {message}")]
    Comm { message: String },
}

pub type DriverFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, DriverError>> + Send + 'a>>;

pub trait DeviceMemoryPort: Send + Sync {
    /// 读取 `[address, address + size)`；超时语义由端口自身负责。
    fn read_memory<'a>(&'a self, address: u32, size: u32) -> DriverFuture<'a>;
}

/// 监控开关 / 设备连接状态查询（由宿主提供）。
pub trait SessionState: Send + Sync {
    fn monitoring_active(&self) -> bool;
    fn device_connected(&self) -> bool;

    fn polling_allowed(&self) -> bool {
        self.monitoring_active() && self.device_connected()
    }
}

#[derive(Debug, Default)]
pub struct SessionFlags {
    monitoring: AtomicBool,
    connected: AtomicBool,
}

impl SessionFlags {
    pub fn new(monitoring: bool, connected: bool) -> Self {
        Self {
            monitoring: AtomicBool::new(monitoring),
            connected: AtomicBool::new(connected),
        }
    }

    pub fn set_monitoring(&self, active: bool) {
        self.monitoring.store(active, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl SessionState for SessionFlags {
    fn monitoring_active(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    fn device_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
