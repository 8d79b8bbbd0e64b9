//! Fixed-capacity worker pool with channel-based coordination
//!
//! # Features
//! - Bounded worker count enforced by a slot semaphore
//! - Lazy or pre-allocated worker provisioning
//! - Blocking or busy-rejecting submission on saturation
//! - Panic isolation with automatic worker replacement
//! - Graceful drain on shutdown
//! - Length-delimited TCP submit server driving the pool

pub mod errors;
pub mod frame;
pub mod metrics;
pub mod packet;
pub mod pool;
pub mod server;

pub use errors::ScheduleError;
pub use pool::{Config, Pool, Task};
