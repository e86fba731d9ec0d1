//! Trace and span id generation.

use std::cell::RefCell;

use rand::{rngs, Rng, SeedableRng};

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_entropy());
}

/// Generate a new trace or span id.
///
/// Ids are drawn uniformly from `[1, 2^63 - 1]`; zero is reserved to mean
/// "absent". The generator is fast and collision-tolerant, not
/// unpredictable: there is no security requirement on these values.
pub fn new_id() -> u64 {
    CURRENT_RNG.with(|rng| rng.borrow_mut().gen_range(1..=(u64::MAX >> 1)))
}
