//! Sequence and acknowledgment bookkeeping.
//!
//! There is no resend loop in this protocol. Outbound headers carry the
//! highest sequence seen from the peer plus a 32-wide bitfield of the
//! sequences at and below it; channels that must not lose data (player
//! inputs) are protected by redundant payloads instead, and snapshots
//! self-heal at 20 Hz.

use std::collections::VecDeque;
use std::time::Instant;

/// Per-peer sequence state: what we have sent, what we have seen.
#[derive(Debug, Default, Clone)]
pub struct AckState {
    local_sequence: u32,
    remote_sequence: u32,
    ack_bits: u32,
}

impl AckState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next outbound sequence. The first packet carries 1.
    pub fn next_sequence(&mut self) -> u32 {
        self.local_sequence += 1;
        self.local_sequence
    }

    /// Folds an incoming sequence into the receive window.
    pub fn on_receive(&mut self, sequence: u32) {
        if sequence > self.remote_sequence {
            let shift = sequence - self.remote_sequence;
            if shift < 32 {
                self.ack_bits = (self.ack_bits << shift) | 1;
            } else {
                self.ack_bits = 1;
            }
            self.remote_sequence = sequence;
        } else if sequence < self.remote_sequence {
            let diff = self.remote_sequence - sequence;
            if diff < 32 {
                self.ack_bits |= 1 << diff;
            }
        }
    }

    /// Fields for the next outbound header: `(ack, ack_bits)`.
    pub fn ack_fields(&self) -> (u32, u32) {
        (self.remote_sequence, self.ack_bits)
    }

    pub fn remote_sequence(&self) -> u32 {
        self.remote_sequence
    }

    pub fn ack_bits(&self) -> u32 {
        self.ack_bits
    }
}

#[derive(Debug, Clone)]
struct PendingPacket {
    sequence: u32,
    send_time: Instant,
    acked: bool,
}

const MAX_PENDING: usize = 256;
const RTT_ALPHA: f32 = 0.125;

/// Remembers recently sent sequences and smooths an RTT estimate from the
/// acks that come back.
#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<PendingPacket>,
    srtt: f32,
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AckTracker {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::with_capacity(MAX_PENDING),
            srtt: 0.1,
        }
    }

    pub fn track(&mut self, sequence: u32) {
        while self.pending.len() >= MAX_PENDING {
            self.pending.pop_front();
        }
        self.pending.push_back(PendingPacket {
            sequence,
            send_time: Instant::now(),
            acked: false,
        });
    }

    /// Marks every pending sequence covered by `ack`/`ack_bits` and samples
    /// RTT from the freshly covered ones. Bit `d` of `ack_bits` covers
    /// sequence `ack - d`.
    pub fn process_ack(&mut self, ack: u32, ack_bits: u32) {
        let now = Instant::now();

        for pending in &mut self.pending {
            if pending.acked {
                continue;
            }

            let covered = if pending.sequence == ack {
                true
            } else if pending.sequence < ack {
                let diff = ack - pending.sequence;
                diff < 32 && (ack_bits >> diff) & 1 == 1
            } else {
                false
            };

            if covered {
                pending.acked = true;
                let sample = now.duration_since(pending.send_time).as_secs_f32();
                self.srtt = (1.0 - RTT_ALPHA) * self.srtt + RTT_ALPHA * sample;
            }
        }

        while self.pending.front().is_some_and(|p| p.acked) {
            self.pending.pop_front();
        }
    }

    /// Smoothed round-trip estimate in seconds.
    pub fn srtt(&self) -> f32 {
        self.srtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_monotonicity() {
        let mut acks = AckState::new();
        acks.on_receive(5);

        assert_eq!(acks.remote_sequence(), 5);
        assert_eq!(acks.ack_bits() & 1, 1);

        acks.on_receive(8);
        assert_eq!(acks.remote_sequence(), 8);
        assert_eq!(acks.ack_bits() & 1, 1);
        // Sequence 5 now sits 3 below the head.
        assert_eq!((acks.ack_bits() >> 3) & 1, 1);
    }

    #[test]
    fn late_packet_sets_offset_bit() {
        let mut acks = AckState::new();
        acks.on_receive(10);
        acks.on_receive(7);

        assert_eq!(acks.remote_sequence(), 10);
        assert_eq!((acks.ack_bits() >> 3) & 1, 1);
    }

    #[test]
    fn duplicate_sequence_is_a_no_op() {
        let mut acks = AckState::new();
        acks.on_receive(4);
        let before = acks.ack_fields();
        acks.on_receive(4);
        assert_eq!(acks.ack_fields(), before);
    }

    #[test]
    fn large_gap_resets_window() {
        let mut acks = AckState::new();
        acks.on_receive(1);
        acks.on_receive(100);

        assert_eq!(acks.remote_sequence(), 100);
        assert_eq!(acks.ack_bits(), 1);
    }

    #[test]
    fn stale_sequence_outside_window_is_ignored() {
        let mut acks = AckState::new();
        acks.on_receive(100);
        let before = acks.ack_fields();
        acks.on_receive(10);
        assert_eq!(acks.ack_fields(), before);
    }

    #[test]
    fn local_sequence_increments() {
        let mut acks = AckState::new();
        assert_eq!(acks.next_sequence(), 1);
        assert_eq!(acks.next_sequence(), 2);
        assert_eq!(acks.next_sequence(), 3);
    }

    #[test]
    fn tracker_samples_rtt() {
        let mut tracker = AckTracker::new();
        tracker.track(1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        tracker.process_ack(1, 1);

        assert!(tracker.srtt() > 0.0);
        assert!(tracker.pending.is_empty());
    }

    #[test]
    fn tracker_covers_bitfield_range() {
        let mut tracker = AckTracker::new();
        for seq in 1..=5 {
            tracker.track(seq);
        }
        // Ack 5 with bits covering 4, 3, 2, 1 below it.
        tracker.process_ack(5, 0b11111);
        assert!(tracker.pending.is_empty());
    }
}
