//! Client-side input history for reconciliation.
//!
//! A fixed-capacity ring of `(input, predicted state)` pairs. Entries stay
//! until the host acknowledges them via `lastProcessedInput`; whatever is
//! still here gets replayed on top of each authoritative state. The ring
//! never allocates and overwrites its oldest entry when full.

use crate::protocol::{PlayerInput, PlayerState, INPUT_BUFFER_SIZE};

#[derive(Debug)]
pub struct InputHistory {
    inputs: [PlayerInput; INPUT_BUFFER_SIZE],
    predicted: [PlayerState; INPUT_BUFFER_SIZE],
    head: usize,
    count: usize,
}

impl Default for InputHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl InputHistory {
    pub fn new() -> Self {
        Self {
            inputs: [PlayerInput::default(); INPUT_BUFFER_SIZE],
            predicted: [PlayerState::default(); INPUT_BUFFER_SIZE],
            head: 0,
            count: 0,
        }
    }

    pub fn push(&mut self, input: PlayerInput, predicted: PlayerState) {
        let idx = (self.head + self.count) % INPUT_BUFFER_SIZE;
        self.inputs[idx] = input;
        self.predicted[idx] = predicted;
        if self.count < INPUT_BUFFER_SIZE {
            self.count += 1;
        } else {
            self.head = (self.head + 1) % INPUT_BUFFER_SIZE;
        }
    }

    /// Drops every entry the host has already applied.
    pub fn acknowledge_up_to(&mut self, sequence: u32) {
        while self.count > 0 && self.inputs[self.head].sequence <= sequence {
            self.head = (self.head + 1) % INPUT_BUFFER_SIZE;
            self.count -= 1;
        }
    }

    /// Unacknowledged inputs, oldest first.
    pub fn unacknowledged(&self) -> impl Iterator<Item = &PlayerInput> {
        (0..self.count).map(move |i| &self.inputs[(self.head + i) % INPUT_BUFFER_SIZE])
    }

    /// The `n` most recent unacknowledged inputs, oldest first. This is the
    /// redundant tail every INPUT packet carries.
    pub fn recent_unacknowledged(&self, n: usize) -> impl Iterator<Item = &PlayerInput> {
        let skip = self.count.saturating_sub(n);
        self.unacknowledged().skip(skip)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_input(sequence: u32) -> PlayerInput {
        PlayerInput {
            sequence,
            ..Default::default()
        }
    }

    #[test]
    fn acknowledge_drops_prefix() {
        let mut history = InputHistory::new();
        for seq in 1..=10 {
            history.push(seq_input(seq), PlayerState::default());
        }
        assert_eq!(history.len(), 10);

        history.acknowledge_up_to(5);

        let remaining: Vec<u32> = history.unacknowledged().map(|i| i.sequence).collect();
        assert_eq!(remaining, vec![6, 7, 8, 9, 10]);
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let mut history = InputHistory::new();
        for seq in 1..=4 {
            history.push(seq_input(seq), PlayerState::default());
        }

        history.acknowledge_up_to(2);
        history.acknowledge_up_to(2);
        assert_eq!(history.len(), 2);

        history.acknowledge_up_to(100);
        assert!(history.is_empty());
    }

    #[test]
    fn overflow_overwrites_oldest() {
        let mut history = InputHistory::new();
        for seq in 1..=(INPUT_BUFFER_SIZE as u32 + 8) {
            history.push(seq_input(seq), PlayerState::default());
        }

        assert_eq!(history.len(), INPUT_BUFFER_SIZE);
        let first = history.unacknowledged().next().unwrap().sequence;
        assert_eq!(first, 9);
    }

    #[test]
    fn recent_tail() {
        let mut history = InputHistory::new();
        for seq in 1..=8 {
            history.push(seq_input(seq), PlayerState::default());
        }

        let tail: Vec<u32> = history.recent_unacknowledged(5).map(|i| i.sequence).collect();
        assert_eq!(tail, vec![4, 5, 6, 7, 8]);

        let all: Vec<u32> = history.recent_unacknowledged(20).map(|i| i.sequence).collect();
        assert_eq!(all.len(), 8);
    }
}
