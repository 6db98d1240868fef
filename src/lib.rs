//! Ladder-logic online monitor core.
//! Responsibilities: resolve symbolic/direct addresses, evaluate rung power flow,
//! keep a local memory image fresh by polling a device in clustered batches.
//! Non-goals: rendering, code editing, compilation, project persistence, wire protocol.

pub mod monitor;

pub use monitor::adapters::driver::{DeviceMemoryPort, DriverError, SessionFlags, SessionState};
pub use monitor::config::MonitorConfig;
pub use monitor::core::address::{AddressRef, AddressResolver};
pub use monitor::core::ladder::{LadderEvaluator, LadderNetwork};
pub use monitor::core::model::{ProjectDescriptor, ResolvedAddress, SemanticType, Symbol};
pub use monitor::usecase::scheduler::{LiveMemoryScheduler, MemoryCallback, TickReport};
