//! Background Tasks Module
//!
//! # Tasks
//! - Expiration sweep: removes expired entries (with cascade) at a fixed interval

mod sweep;

pub use sweep::spawn_sweep_task;
