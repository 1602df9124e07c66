//! Round-trip measurements taken from 1-RTT acknowledgements.

use std::collections::VecDeque;

use crate::transport::{Instant, MICROS_PER_MS};

/// Samples kept per connection.
const HISTORY_LEN: usize = 256;

/// Used for the retransmission timer until the first sample.
pub const INITIAL_RTT: u64 = 333 * MICROS_PER_MS;

/// Lower bound of the probe timeout.
pub const MIN_PTO: u64 = 200 * MICROS_PER_MS;

/// One processed ACK, measured against the largest acknowledged packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttSample {
    /// When the largest acknowledged packet was sent.
    pub sent_at: Instant,
    /// When the peer received it: arrival of the ACK minus its ack delay.
    pub received_at: Instant,
    /// Bytes and packets we sent between `sent_at` and `received_at`.
    pub sent_bytes: usize,
    pub sent_packets: usize,
    /// Bytes and packets we received over the same interval.
    pub received_bytes: usize,
    pub received_packets: usize,
    pub rtt: u64,
}

#[derive(Debug, Default)]
pub struct RttEstimator {
    history: VecDeque<RttSample>,
    smoothed: Option<u64>,
    latest: Option<u64>,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample unless it repeats the previous one.
    pub fn push(&mut self, sample: RttSample) {
        if let Some(last) = self.history.back() {
            if last.sent_at == sample.sent_at || last.received_at == sample.received_at {
                return;
            }
        }
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(sample);

        self.latest = Some(sample.rtt);
        self.smoothed = Some(match self.smoothed {
            None => sample.rtt,
            Some(srtt) => (7 * srtt + sample.rtt) / 8,
        });
    }

    pub fn history(&self) -> impl Iterator<Item = &RttSample> {
        self.history.iter()
    }

    pub fn latest(&self) -> Option<u64> {
        self.latest
    }

    pub fn smoothed(&self) -> u64 {
        self.smoothed.unwrap_or(INITIAL_RTT)
    }

    /// Probe timeout: `max(3 * smoothed_rtt, 200ms)`.
    pub fn pto(&self) -> u64 {
        (3 * self.smoothed()).max(MIN_PTO)
    }
}
