//! Priority scheduler with a bounded worker pool and a reserved immediate lane.
//!
//! Queued tasks run on at most `max_workers` concurrent bodies, highest
//! priority first and FIFO within a priority, and only once none of their
//! dependencies is still tracked. Immediate tasks bypass the queue and take
//! the single reserved slot, waiting in arrival order while it is busy.
//!
//! Split into focused submodules:
//! - `core`: Scheduler handle, shared state, and read-only accessors
//! - `admission`: `submit` and the preemption policy hook
//! - `execution`: body spawning, settlement, and deferred side effects
//! - `control`: cancellation, disconnect, and reconnect
//! - `state`: lock-protected bookkeeping

mod admission;
mod control;
mod core;
mod execution;
mod state;

pub use self::admission::PreemptionPolicy;
pub use self::core::Scheduler;
pub(crate) use self::core::WeakScheduler;
