//! Time and randomness collaborators for the sans-io core.

/// Timestamp in microseconds from an arbitrary epoch.
/// Used for RTT samples, scheduler windows and timers.
pub type Instant = u64;

pub const MICROS_PER_MS: u64 = 1_000;
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Random bytes for connection IDs, key shares and reset tokens.
///
/// Injected so tests can run deterministically.
pub trait Rng {
    /// Fill `buf` with random bytes.
    fn fill(&mut self, buf: &mut [u8]);
}

/// Operating-system backed cryptographic RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRng;

impl Rng for SystemRng {
    fn fill(&mut self, buf: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buf);
    }
}

impl<R: Rng + ?Sized> Rng for &mut R {
    fn fill(&mut self, buf: &mut [u8]) {
        (**self).fill(buf)
    }
}

/// Microseconds elapsed since `epoch`, for callers driving the core from
/// `std::time::Instant`.
pub fn micros_since(epoch: std::time::Instant) -> Instant {
    epoch.elapsed().as_micros() as Instant
}
