//! 用例层（usecase）：把 core 算法与设备端口编排成实时监控流程。

pub mod scheduler;
