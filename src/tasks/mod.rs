//! Background Tasks Module
//!
//! Loops that run for the lifetime of the host.
//!
//! # Tasks
//! - gc: removes entries unused for longer than their gcTime
//! - persist: writes the cache snapshot to the durable store

mod gc;
mod persist;

pub use gc::spawn_gc_task;
pub use persist::spawn_persist_task;
