//! Packet number spaces.

use std::collections::{BTreeMap, VecDeque};

use crate::ranges::RangeSet;
use crate::transport::Instant;

/// How many receive records the 1-RTT space keeps for RTT samples.
const RECV_HISTORY_LEN: usize = 1024;

/// An ack-eliciting packet waiting for acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentPacket {
    pub time_sent: Instant,
    /// UDP payload bytes.
    pub size: usize,
}

/// A packet recorded in the rolling send window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentRecord {
    pub packet_number: u64,
    pub time_sent: Instant,
    pub size: usize,
}

/// A received packet, for RTT sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvRecord {
    pub packet_number: u64,
    pub time_received: Instant,
    pub size: usize,
}

/// Send and receive state of one packet number space.
#[derive(Debug, Default)]
pub struct PacketSpace {
    next_pn: u64,
    pub largest_acked: Option<u64>,
    pub in_flight: BTreeMap<u64, SentPacket>,
    /// Every packet sent, trimmed to the scheduler's rate window.
    pub history: VecDeque<SentRecord>,

    pub received: RangeSet,
    pub largest_received: Option<u64>,
    pub recv_history: VecDeque<RecvRecord>,
    /// Received packet numbers not yet covered by an ACK we sent.
    pub pending_ack: RangeSet,
}

impl PacketSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packet number the next send will use.
    pub fn peek_pn(&self) -> u64 {
        self.next_pn
    }

    pub fn take_pn(&mut self) -> u64 {
        let pn = self.next_pn;
        self.next_pn += 1;
        pn
    }

    /// Value to decode truncated packet numbers against.
    pub fn expected_pn(&self) -> u64 {
        self.largest_received.map_or(0, |pn| pn + 1)
    }

    /// Record a successfully decrypted packet. Returns `false` for a
    /// duplicate, which must not be processed again.
    pub fn on_received(&mut self, pn: u64, now: Instant, size: usize) -> bool {
        if !self.received.add(pn, pn + 1) {
            return false;
        }
        if self.largest_received.map_or(true, |largest| pn > largest) {
            self.largest_received = Some(pn);
        }
        if self.recv_history.len() == RECV_HISTORY_LEN {
            self.recv_history.pop_front();
        }
        self.recv_history.push_back(RecvRecord {
            packet_number: pn,
            time_received: now,
            size,
        });
        true
    }

    pub fn received_at(&self, pn: u64) -> Option<Instant> {
        self.recv_history
            .iter()
            .rev()
            .find(|r| r.packet_number == pn)
            .map(|r| r.time_received)
    }

    pub fn on_sent(&mut self, pn: u64, now: Instant, size: usize, ack_eliciting: bool) {
        self.history.push_back(SentRecord {
            packet_number: pn,
            time_sent: now,
            size,
        });
        if ack_eliciting {
            self.in_flight.insert(
                pn,
                SentPacket {
                    time_sent: now,
                    size,
                },
            );
        }
    }

    /// Remove acknowledged packets from flight; returns their numbers.
    pub fn on_ack(&mut self, acked: &RangeSet) -> Vec<u64> {
        if let Some(last) = acked.last() {
            let largest = last.end - 1;
            if self.largest_acked.map_or(true, |l| largest > l) {
                self.largest_acked = Some(largest);
            }
        }
        let newly: Vec<u64> = self
            .in_flight
            .keys()
            .copied()
            .filter(|&pn| acked.contains(pn))
            .collect();
        for pn in &newly {
            self.in_flight.remove(pn);
        }
        newly
    }

    /// Drop send records at or before `cutoff`.
    pub fn prune_history(&mut self, cutoff: Instant) {
        while self.history.front().is_some_and(|r| r.time_sent <= cutoff) {
            self.history.pop_front();
        }
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.in_flight.values().map(|p| p.size).sum()
    }

    /// Send time of the oldest packet still in flight.
    pub fn oldest_in_flight(&self) -> Option<Instant> {
        self.in_flight.values().map(|p| p.time_sent).min()
    }

    /// Take every packet sent at or before `cutoff` out of flight.
    pub fn take_lost(&mut self, cutoff: Instant) -> Vec<u64> {
        let lost: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, p)| p.time_sent <= cutoff)
            .map(|(&pn, _)| pn)
            .collect();
        for pn in &lost {
            self.in_flight.remove(pn);
        }
        lost
    }

    /// Forget everything; used when an epoch's keys are discarded.
    pub fn discard(&mut self) {
        self.in_flight.clear();
        self.history.clear();
        self.recv_history.clear();
        self.pending_ack.clear();
    }
}
