//! Deterministic movement kernel.
//!
//! This function is the single source of kinematic truth: the host applies
//! it authoritatively and the client applies it for prediction and replay.
//! The same `(state, input)` pair must produce bit-identical results on
//! both sides, which is why it is pure — no collision, no bounds, no
//! external state.

use crate::protocol::{PlayerInput, PlayerState};

/// Movement speed in units per second.
pub const MOVE_SPEED: f32 = 5.0;

/// Advances a player state by one input frame.
///
/// A and D translate along the fixed direction `(sin yaw, -cos yaw)`; this
/// is perpendicular to the view only at the spawn yaw of -90 degrees. The
/// equations are kept as-is so host and client stay in lockstep.
pub fn apply_input(state: &mut PlayerState, input: &PlayerInput) {
    let v = MOVE_SPEED * input.delta_time;
    let yaw = input.yaw.to_radians();

    if input.has_key(PlayerInput::KEY_FORWARD) {
        state.position.x += yaw.cos() * v;
        state.position.z += yaw.sin() * v;
    }
    if input.has_key(PlayerInput::KEY_BACK) {
        state.position.x -= yaw.cos() * v;
        state.position.z -= yaw.sin() * v;
    }
    if input.has_key(PlayerInput::KEY_LEFT) {
        state.position.x += yaw.sin() * v;
        state.position.z -= yaw.cos() * v;
    }
    if input.has_key(PlayerInput::KEY_RIGHT) {
        state.position.x -= yaw.sin() * v;
        state.position.z += yaw.cos() * v;
    }
    if input.has_key(PlayerInput::KEY_UP) {
        state.position.y += v;
    }
    if input.has_key(PlayerInput::KEY_DOWN) {
        state.position.y -= v;
    }

    state.yaw = input.yaw;
    state.pitch = input.pitch;
}
