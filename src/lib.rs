//! Pulse — host-authoritative UDP netcode for a small multiplayer sandbox.
//!
//! The host simulates at a fixed 60 Hz and broadcasts the full player
//! roster at 20 Hz; clients predict their own movement immediately,
//! reconcile against every authoritative update by replaying
//! unacknowledged inputs, and render remote players a few ticks in the
//! past through per-player interpolation buffers.
//!
//! ```text
//!  ┌────────────────────────── HOST ──────────────────────────┐
//!  │ receive ─▶ input queues ─▶ tick (60 Hz) ─▶ roster (20 Hz)│
//!  └───────────▲──────────────────────────────────┬───────────┘
//!              │ INPUT (redundant burst)          │ STATE_UPDATE
//!  ┌───────────┴──────────────────────────────────▼───────────┐
//!  │ predict ─▶ input history ─▶ reconcile   interp buffers   │
//!  └────────────────────────── CLIENT ────────────────────────┘
//! ```
//!
//! Everything is single-threaded and cooperative: one `update(dt)` call
//! per frame drains the socket, advances the simulation, and emits
//! whatever the tick produced. No operation blocks.
//!
//! The shell (window, renderer, input capture) is an external
//! collaborator: it calls [`Client::send_input`] each frame and reads
//! back [`Client::local_state`] plus
//! [`Client::interpolated_remote_players`].

pub mod client;
pub mod codec;
pub mod connection;
pub mod history;
pub mod host;
pub mod interpolation;
pub mod movement;
pub mod protocol;
pub mod reliability;
pub mod transport;

pub use client::{Client, ClientConfig, ClientEvent};
pub use codec::{PacketBuffer, HEADER_SIZE};
pub use connection::{Connection, ConnectionState, ConnectionTable};
pub use history::InputHistory;
pub use host::{Host, HostConfig, HostEvent};
pub use interpolation::StateBuffer;
pub use movement::apply_input;
pub use protocol::{
    EntityState, PacketHeader, PacketType, PlayerInput, PlayerState, CONNECTION_TIMEOUT,
    DEFAULT_PORT, HEARTBEAT_INTERVAL, INTERPOLATION_DELAY, MAX_PACKET_SIZE, MAX_PLAYERS,
    SNAPSHOT_RATE, TICK_INTERVAL, TICK_RATE,
};
pub use reliability::{AckState, AckTracker};
pub use transport::{NetError, NetworkStats, UdpTransport};
