//! Synchronization primitives
//!
//! - [`ThinEvent`]: a manual-reset event that spins briefly before it blocks,
//!   and only allocates its blocking handle the first time a waiter needs one.
//! - [`CountdownLatch`]: opens once a fixed number of `set` calls arrived.
//! - [`ThreadSafeRandom`]: random numbers from a per-thread generator.

mod latch;
mod random;
mod thin_event;

pub use latch::CountdownLatch;
pub use random::ThreadSafeRandom;
pub use thin_event::ThinEvent;
