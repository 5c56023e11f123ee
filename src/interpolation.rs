//! Timestamped state buffer for remote players.
//!
//! Each remote player owns a fixed ring of authoritative states, stored in
//! the order received. Rendering happens a few ticks in the past: the buffer
//! is scanned newest to oldest for the sample at or below the render tick,
//! and the position is lerped toward the sample that followed it. The delay
//! gives the buffer enough depth to smooth network jitter.

use crate::protocol::{PlayerState, STATE_BUFFER_SIZE};

#[derive(Debug)]
pub struct StateBuffer {
    states: [PlayerState; STATE_BUFFER_SIZE],
    count: u32,
}

impl Default for StateBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBuffer {
    pub fn new() -> Self {
        Self {
            states: [PlayerState::default(); STATE_BUFFER_SIZE],
            count: 0,
        }
    }

    /// Appends a state, overwriting the oldest slot once full.
    pub fn push(&mut self, state: PlayerState) {
        self.states[self.count as usize % STATE_BUFFER_SIZE] = state;
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        (self.count as usize).min(STATE_BUFFER_SIZE)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The most recently pushed state, if any.
    pub fn latest(&self) -> Option<&PlayerState> {
        if self.count == 0 {
            return None;
        }
        Some(&self.states[(self.count as usize - 1) % STATE_BUFFER_SIZE])
    }

    /// Resolves the player's state at `target_tick`.
    ///
    /// Scans from newest to oldest for the first sample at or below the
    /// target. If a newer sample follows it in insertion order, the result
    /// is a clamped lerp between the two; otherwise the sample is returned
    /// as-is. `None` means the peer has no sample old enough to render yet.
    ///
    /// Yaw and pitch are lerped without wrapping; callers keep yaw
    /// continuous, so a crossing of the ±180° boundary sweeps the long arc.
    pub fn interpolate(&self, target_tick: u32) -> Option<PlayerState> {
        if self.count < 2 {
            return None;
        }

        let mut before: Option<&PlayerState> = None;
        let mut after: Option<&PlayerState> = None;

        for i in 0..self.len() as u32 {
            let state = &self.states[((self.count - 1 - i) as usize) % STATE_BUFFER_SIZE];
            if state.tick <= target_tick {
                before = Some(state);
                if i > 0 {
                    after = Some(&self.states[((self.count - i) as usize) % STATE_BUFFER_SIZE]);
                }
                break;
            }
        }

        let before = before?;
        let Some(after) = after else {
            // Target is at or past the freshest sample.
            return Some(*before);
        };

        let span = after.tick.saturating_sub(before.tick);
        if span == 0 {
            return Some(*after);
        }

        let t = ((target_tick - before.tick) as f32 / span as f32).clamp(0.0, 1.0);

        Some(PlayerState {
            id: before.id,
            tick: target_tick,
            position: before.position.lerp(after.position, t),
            yaw: before.yaw + (after.yaw - before.yaw) * t,
            pitch: before.pitch + (after.pitch - before.pitch) * t,
            last_processed_input: after.last_processed_input,
        })
    }
}
