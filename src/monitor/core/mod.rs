//! 核心层（core）：纯数据模型与算法，不做 IO。

pub mod address;
pub mod codec;
pub mod ladder;
pub mod model;
pub mod plan;
