//! 适配器层（adapters）：设备内存端口及其 mock 实现。

pub mod driver;
