//! Contention window backoff

use rand_core::RngCore;

/// Maximum window exponent, keeps `2^attempts * cw_min` inside a u32
pub const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Contention window for the given attempt count, `2^attempts * cw_min`
pub fn window(attempts: u32, cw_min: u32) -> u32 {
    let exp = attempts.min(MAX_BACKOFF_EXPONENT);
    cw_min.saturating_mul(1 << exp).max(1)
}

/// Draw a backoff slot count uniformly from `[0, 2^attempts * cw_min)`
pub fn draw<R: RngCore + ?Sized>(rng: &mut R, attempts: u32, cw_min: u32) -> u32 {
    rng.next_u32() % window(attempts, cw_min)
}

/// Count down one backoff slot
pub fn tick(count: u32) -> u32 {
    count.saturating_sub(1)
}
