use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::cell::RefCell;
use std::ops::Range;

thread_local! {
    static THREAD_RNG: RefCell<StdRng> = RefCell::new(StdRng::from_entropy());
}

/// Random numbers safe to draw from any thread
///
/// Each thread owns a generator seeded from fresh OS entropy the first time it
/// draws, so threads started together never share a sequence and no lock is
/// taken on the hot path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSafeRandom;

impl ThreadSafeRandom {
    /// Run `f` with this thread's generator
    pub fn with_rng<R>(f: impl FnOnce(&mut StdRng) -> R) -> R {
        THREAD_RNG.with(|rng| f(&mut rng.borrow_mut()))
    }

    /// Uniform `u32`
    pub fn next_u32() -> u32 {
        Self::with_rng(|rng| rng.next_u32())
    }

    /// Uniform `u64`
    pub fn next_u64() -> u64 {
        Self::with_rng(|rng| rng.next_u64())
    }

    /// Uniform value in `range`; an empty range returns `range.start`
    pub fn next_range(range: Range<u64>) -> u64 {
        if range.is_empty() {
            return range.start;
        }
        Self::with_rng(|rng| rng.gen_range(range))
    }

    /// Uniform `f64` in `[0, 1)`
    pub fn next_f64() -> f64 {
        Self::with_rng(|rng| rng.gen())
    }

    /// Fill `buffer` with random bytes
    pub fn fill_bytes(buffer: &mut [u8]) {
        Self::with_rng(|rng| rng.fill_bytes(buffer))
    }
}
