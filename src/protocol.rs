//! Wire protocol definitions.
//!
//! Every datagram starts with a magic-prefixed [`PacketHeader`] carrying the
//! sender's sequence, the cumulative ack plus ack bitfield, and the sender's
//! current tick. The payload that follows is determined by the header's type
//! byte. All integers on the wire are little-endian; floats travel as their
//! IEEE-754 bit pattern.

use glam::Vec3;

/// Default UDP port for host and client.
pub const DEFAULT_PORT: u16 = 7777;
/// Largest datagram either side will emit (safe MTU).
pub const MAX_PACKET_SIZE: usize = 1400;
/// Hard cap on the player roster, host player included.
pub const MAX_PLAYERS: usize = 16;

/// Fixed simulation steps per second.
pub const TICK_RATE: u32 = 60;
/// Duration of one simulation step in seconds.
pub const TICK_INTERVAL: f32 = 1.0 / TICK_RATE as f32;
/// Roster broadcasts per second.
pub const SNAPSHOT_RATE: u32 = 20;
/// Duration between roster broadcasts in seconds.
pub const SNAPSHOT_INTERVAL: f32 = 1.0 / SNAPSHOT_RATE as f32;

/// Seconds of silence after which a peer is considered gone.
pub const CONNECTION_TIMEOUT: f32 = 10.0;
/// Seconds of send-side silence before a keepalive goes out.
pub const HEARTBEAT_INTERVAL: f32 = 1.0;
/// How far behind the freshest server state remote players are rendered.
pub const INTERPOLATION_DELAY: f32 = 0.1;
/// Capacity of the client's unacknowledged input ring.
pub const INPUT_BUFFER_SIZE: usize = 64;
/// Capacity of each remote player's state ring.
pub const STATE_BUFFER_SIZE: usize = 128;

/// First four bytes of every valid datagram.
pub const PROTOCOL_MAGIC: [u8; 4] = *b"PULS";

/// Where freshly accepted players materialize.
pub const SPAWN_POSITION: Vec3 = Vec3::new(0.0, 1.7, 5.0);
/// Spawn look direction, degrees.
pub const SPAWN_YAW: f32 = -90.0;

/// Packet type tags. The codes are wire-stable; `EventBroadcast`, `Ack` and
/// `ReliableData` are reserved and never emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    ConnectRequest = 0x01,
    ConnectAccept = 0x02,
    ConnectReject = 0x03,
    Disconnect = 0x04,
    Heartbeat = 0x05,

    Input = 0x10,
    StateUpdate = 0x11,
    WorldSnapshot = 0x12,

    EntityCreate = 0x20,
    EntityDestroy = 0x21,
    EventBroadcast = 0x22,

    Ack = 0x30,
    ReliableData = 0x31,
}

impl PacketType {
    /// Decodes a wire tag. Unknown tags yield `None` and the dispatcher drops
    /// the packet silently.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::ConnectRequest),
            0x02 => Some(Self::ConnectAccept),
            0x03 => Some(Self::ConnectReject),
            0x04 => Some(Self::Disconnect),
            0x05 => Some(Self::Heartbeat),
            0x10 => Some(Self::Input),
            0x11 => Some(Self::StateUpdate),
            0x12 => Some(Self::WorldSnapshot),
            0x20 => Some(Self::EntityCreate),
            0x21 => Some(Self::EntityDestroy),
            0x22 => Some(Self::EventBroadcast),
            0x30 => Some(Self::Ack),
            0x31 => Some(Self::ReliableData),
            _ => None,
        }
    }
}

/// Fixed header at the start of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub magic: [u8; 4],
    /// Raw type byte; see [`PacketHeader::packet_type`].
    pub kind: u8,
    /// Sender's local packet sequence.
    pub sequence: u32,
    /// Highest sequence received from the peer.
    pub ack: u32,
    /// Bitfield over the 32 sequences at and below `ack`.
    pub ack_bits: u32,
    /// Sender's current tick.
    pub tick: u32,
    /// Bytes of payload following the header.
    pub payload_size: u16,
}

impl PacketHeader {
    pub fn new(kind: PacketType) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            kind: kind as u8,
            sequence: 0,
            ack: 0,
            ack_bits: 0,
            tick: 0,
            payload_size: 0,
        }
    }

    /// True when the magic prefix matches. Anything else is dropped without
    /// further inspection.
    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u8(self.kind)
    }
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self::new(PacketType::Heartbeat)
    }
}

/// One frame of player input, stamped by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerInput {
    /// Monotonic per-client input sequence.
    pub sequence: u32,
    /// Server tick this input targets.
    pub tick: u32,
    /// Key bitfield, see the `KEY_*` constants.
    pub keys: u8,
    /// Look direction, degrees.
    pub yaw: f32,
    pub pitch: f32,
    /// Client frame delta in seconds.
    pub delta_time: f32,
}

impl PlayerInput {
    pub const KEY_FORWARD: u8 = 1 << 0;
    pub const KEY_BACK: u8 = 1 << 1;
    pub const KEY_LEFT: u8 = 1 << 2;
    pub const KEY_RIGHT: u8 = 1 << 3;
    pub const KEY_UP: u8 = 1 << 4;
    pub const KEY_DOWN: u8 = 1 << 5;

    /// Serialized size of one input on the wire. INPUT payloads are parsed as
    /// `payload_size / WIRE_SIZE` consecutive records.
    pub const WIRE_SIZE: usize = 21;

    #[inline]
    pub fn has_key(&self, key: u8) -> bool {
        self.keys & key != 0
    }

    #[inline]
    pub fn set_key(&mut self, key: u8, pressed: bool) {
        if pressed {
            self.keys |= key;
        } else {
            self.keys &= !key;
        }
    }
}

/// Authoritative state of one player at one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerState {
    /// Stable id assigned by the host (the host player is 0).
    pub id: u32,
    /// Server tick that produced this state.
    pub tick: u32,
    pub position: Vec3,
    /// Look direction, degrees.
    pub yaw: f32,
    pub pitch: f32,
    /// Highest input sequence the host has applied for this player.
    pub last_processed_input: u32,
}

impl PlayerState {
    /// State of a freshly accepted player.
    pub fn spawn(id: u32) -> Self {
        Self {
            id,
            tick: 0,
            position: SPAWN_POSITION,
            yaw: SPAWN_YAW,
            pitch: 0.0,
            last_processed_input: 0,
        }
    }
}

/// Replicated world entity. Players are replicated as `ENTITY_PLAYER`; the
/// host owns a fixed set of `ENTITY_STATIC` cubes defined at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EntityState {
    pub id: u32,
    pub kind: u8,
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    pub pitch: f32,
}

impl EntityState {
    pub const ENTITY_PLAYER: u8 = 0;
    pub const ENTITY_STATIC: u8 = 1;

    pub fn fixed(id: u32, position: Vec3) -> Self {
        Self {
            id,
            kind: Self::ENTITY_STATIC,
            position,
            ..Default::default()
        }
    }
}
