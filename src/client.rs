//! Network client: prediction, reconciliation, interpolation.
//!
//! Inputs are applied locally the moment they are issued and preserved in a
//! replay ring until the host acknowledges them. Authoritative state updates
//! reconcile the local player (replay unacked inputs on top of the server
//! state, then blend or snap) and feed every remote player's interpolation
//! buffer.
//!
//! # Connection state machine
//! ```text
//! ┌──────────────┐    ConnectRequest (1 s retry)    ┌──────────────┐
//! │ Disconnected │ ────────────────────────────────▶│  Connecting  │
//! └──────────────┘                                  └──────────────┘
//!        ▲                                                 │
//!        │ timeout / ConnectReject                         │ ConnectAccept
//!        │                                                 ▼
//!        │        Disconnect / timeout             ┌──────────────┐
//!        └◀────────────────────────────────────────│  Connected   │
//!                                                  └──────────────┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use glam::Vec3;

use crate::codec::PacketBuffer;
use crate::connection::ConnectionState;
use crate::history::InputHistory;
use crate::interpolation::StateBuffer;
use crate::movement::apply_input;
use crate::protocol::{
    EntityState, PacketHeader, PacketType, PlayerInput, PlayerState, CONNECTION_TIMEOUT,
    HEARTBEAT_INTERVAL, INTERPOLATION_DELAY, TICK_INTERVAL,
};
use crate::reliability::{AckState, AckTracker};
use crate::transport::{NetError, NetworkStats, UdpTransport};

/// Below this divergence the prediction is left alone.
const ERROR_THRESHOLD: f32 = 0.01;
/// At or above this divergence the position snaps to the reconciled state.
const SNAP_THRESHOLD: f32 = 1.0;
/// Fraction of the divergence corrected per reconcile when blending.
const BLEND_FACTOR: f32 = 0.1;

/// Events surfaced to the shell, drained via [`Client::poll_events`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientEvent {
    Connected { id: u32 },
    Disconnected,
    EntityCreated { id: u32, kind: u8, position: Vec3 },
    EntityDestroyed { id: u32 },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connection_timeout: Duration,
    pub connect_retry_interval: Duration,
    pub heartbeat_interval: Duration,
    /// How far behind the freshest server tick remote players render.
    pub interpolation_delay: f32,
    /// How many recent unacknowledged inputs ride along in each INPUT packet.
    pub input_redundancy: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs_f32(CONNECTION_TIMEOUT),
            connect_retry_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs_f32(HEARTBEAT_INTERVAL),
            interpolation_delay: INTERPOLATION_DELAY,
            input_redundancy: 5,
        }
    }
}

pub struct Client {
    config: ClientConfig,
    transport: Option<UdpTransport>,
    server_addr: Option<SocketAddr>,
    state: ConnectionState,
    player_id: u32,
    server_tick: u32,
    acks: AckState,
    tracker: AckTracker,
    input_sequence: u32,
    last_send_time: Instant,
    last_receive_time: Instant,
    connect_start: Instant,
    local_state: PlayerState,
    last_server_state: PlayerState,
    remote_players: HashMap<u32, PlayerState>,
    interp_buffers: HashMap<u32, StateBuffer>,
    history: InputHistory,
    events: VecDeque<ClientEvent>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            transport: None,
            server_addr: None,
            state: ConnectionState::Disconnected,
            player_id: 0,
            server_tick: 0,
            acks: AckState::new(),
            tracker: AckTracker::new(),
            input_sequence: 0,
            last_send_time: now,
            last_receive_time: now,
            connect_start: now,
            local_state: PlayerState::default(),
            last_server_state: PlayerState::default(),
            remote_players: HashMap::new(),
            interp_buffers: HashMap::new(),
            history: InputHistory::new(),
            events: VecDeque::new(),
        }
    }

    /// Binds an ephemeral socket and begins the connect handshake. The
    /// request retransmits at one-second intervals until the host answers
    /// or the connection times out.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), NetError> {
        let server_addr = (host, port)
            .to_socket_addrs()
            .map_err(|_| NetError::Address(format!("{}:{}", host, port)))?
            .next()
            .ok_or_else(|| NetError::Address(format!("{}:{}", host, port)))?;

        self.transport = Some(UdpTransport::bind(0)?);
        self.server_addr = Some(server_addr);
        self.state = ConnectionState::Connecting;
        self.acks = AckState::new();
        self.tracker = AckTracker::new();
        self.input_sequence = 0;
        self.history.clear();
        self.remote_players.clear();
        self.interp_buffers.clear();
        self.connect_start = Instant::now();
        self.last_receive_time = Instant::now();

        log::info!("connecting to {}", server_addr);
        self.send_plain(PacketType::ConnectRequest);
        Ok(())
    }

    /// Synchronous teardown: one DISCONNECT datagram, socket released,
    /// buffers cleared, `Disconnected` emitted exactly once.
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.send_plain(PacketType::Disconnect);
            self.state = ConnectionState::Disconnected;
            self.events.push_back(ClientEvent::Disconnected);
            log::info!("disconnected");
        }

        self.transport = None;
        self.server_addr = None;
        self.remote_players.clear();
        self.interp_buffers.clear();
        self.history.clear();
    }

    /// Drives the client. Must be called regularly (the render loop is the
    /// natural driver).
    pub fn update(&mut self, _dt: f32) {
        if self.state == ConnectionState::Disconnected {
            return;
        }

        self.receive_packets();

        match self.state {
            ConnectionState::Connecting => {
                if self.connect_start.elapsed() > self.config.connection_timeout {
                    log::warn!("connect timed out");
                    self.disconnect();
                } else if self.last_send_time.elapsed() >= self.config.connect_retry_interval {
                    self.send_plain(PacketType::ConnectRequest);
                }
            }
            ConnectionState::Connected => {
                if self.last_receive_time.elapsed() > self.config.connection_timeout {
                    log::warn!("server timed out");
                    self.disconnect();
                } else if self.last_send_time.elapsed() >= self.config.heartbeat_interval {
                    self.send_plain(PacketType::Heartbeat);
                }
            }
            _ => {}
        }
    }

    /// Stamps, predicts, records and transmits one input frame. Silent
    /// no-op while not connected.
    pub fn send_input(&mut self, input: &PlayerInput) {
        if self.state != ConnectionState::Connected {
            return;
        }

        self.input_sequence += 1;
        let mut stamped = *input;
        stamped.sequence = self.input_sequence;
        stamped.tick = self.server_tick;

        // Predict locally before the wire ever sees the input.
        let mut predicted = self.local_state;
        apply_input(&mut predicted, &stamped);
        predicted.tick = self.server_tick;

        self.history.push(stamped, predicted);
        self.local_state = predicted;

        let (ack, ack_bits) = self.acks.ack_fields();
        let sequence = self.acks.next_sequence();
        self.tracker.track(sequence);

        let mut header = PacketHeader::new(PacketType::Input);
        header.sequence = sequence;
        header.ack = ack;
        header.ack_bits = ack_bits;
        header.tick = self.server_tick;

        let mut buffer = PacketBuffer::new();
        buffer.write_header(&header);
        // Redundant burst: up to the last N unacked inputs, newest last.
        for recent in self.history.recent_unacknowledged(self.config.input_redundancy) {
            buffer.write_player_input(recent);
        }
        buffer.patch_payload_size();

        if let (Some(transport), Some(addr)) = (self.transport.as_mut(), self.server_addr) {
            transport.send(buffer.as_slice(), addr);
        }
        self.last_send_time = Instant::now();
    }

    /// The locally predicted player state.
    pub fn local_state(&self) -> &PlayerState {
        &self.local_state
    }

    /// Mutable access for the renderer, which owns yaw and pitch between
    /// inputs.
    pub fn local_state_mut(&mut self) -> &mut PlayerState {
        &mut self.local_state
    }

    /// The most recent authoritative state received for the local player.
    pub fn last_server_state(&self) -> &PlayerState {
        &self.last_server_state
    }

    /// Remote players resolved at the delayed render tick. Peers without a
    /// deep enough buffer fall back to their last known state.
    pub fn interpolated_remote_players(&self) -> HashMap<u32, PlayerState> {
        let delay_ticks = (self.config.interpolation_delay / TICK_INTERVAL).ceil() as u32;
        let render_tick = self.server_tick.saturating_sub(delay_ticks);

        let mut result = HashMap::new();
        for (&id, last_known) in &self.remote_players {
            if id == self.player_id {
                continue;
            }
            let state = self
                .interp_buffers
                .get(&id)
                .and_then(|buffer| buffer.interpolate(render_tick))
                .unwrap_or(*last_known);
            result.insert(id, state);
        }
        result
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    pub fn server_tick(&self) -> u32 {
        self.server_tick
    }

    /// Known players including ourselves.
    pub fn player_count(&self) -> usize {
        self.remote_players.len() + 1
    }

    /// Smoothed round-trip estimate in seconds.
    pub fn rtt(&self) -> f32 {
        self.tracker.srtt()
    }

    pub fn stats(&self) -> NetworkStats {
        self.transport
            .as_ref()
            .map(|t| t.stats())
            .unwrap_or_default()
    }

    /// Drains events emitted since the last call.
    pub fn poll_events(&mut self) -> Vec<ClientEvent> {
        self.events.drain(..).collect()
    }

    fn receive_packets(&mut self) {
        let datagrams = match self.transport.as_mut() {
            Some(transport) => transport.receive_all(),
            None => return,
        };

        for (bytes, addr) in datagrams {
            if self.server_addr != Some(addr) {
                continue;
            }

            let mut buffer = PacketBuffer::from_bytes(&bytes);
            let header = buffer.read_header();
            if !header.is_valid() {
                continue;
            }

            self.last_receive_time = Instant::now();
            self.acks.on_receive(header.sequence);
            self.tracker.process_ack(header.ack, header.ack_bits);

            self.handle_packet(&header, &mut buffer);
            if self.state == ConnectionState::Disconnected {
                break;
            }
        }
    }

    fn handle_packet(&mut self, header: &PacketHeader, buffer: &mut PacketBuffer) {
        match header.packet_type() {
            Some(PacketType::ConnectAccept) => self.handle_connect_accept(buffer),
            Some(PacketType::ConnectReject) => {
                log::warn!("connection rejected by host");
                self.disconnect();
            }
            Some(PacketType::Disconnect) => {
                log::info!("host closed the connection");
                self.disconnect();
            }
            Some(PacketType::StateUpdate) => self.handle_state_update(header, buffer),
            Some(PacketType::WorldSnapshot) => self.handle_world_snapshot(buffer),
            Some(PacketType::EntityCreate) => self.handle_entity_create(buffer),
            Some(PacketType::EntityDestroy) => self.handle_entity_destroy(buffer),
            Some(PacketType::Heartbeat) => {}
            // Unknown or unexpected types are dropped silently.
            _ => {}
        }
    }

    fn handle_connect_accept(&mut self, buffer: &mut PacketBuffer) {
        let player_id = buffer.read_u32();
        let server_tick = buffer.read_u32();

        // A lost accept makes the host answer our retransmit again.
        if self.state != ConnectionState::Connecting {
            return;
        }

        self.player_id = player_id;
        self.server_tick = server_tick;
        self.state = ConnectionState::Connected;

        self.local_state = PlayerState::spawn(player_id);
        self.local_state.tick = server_tick;
        self.last_server_state = self.local_state;

        log::info!("connected as player {} at tick {}", player_id, server_tick);
        self.events.push_back(ClientEvent::Connected { id: player_id });
    }

    fn handle_state_update(&mut self, header: &PacketHeader, buffer: &mut PacketBuffer) {
        // Before the accept arrives our player id is unassigned; a roster
        // entry must not be mistaken for our own state.
        if self.state != ConnectionState::Connected {
            return;
        }

        self.server_tick = header.tick;

        let count = buffer.read_u8();
        for _ in 0..count {
            let state = buffer.read_player_state();
            if state.id == self.player_id {
                self.reconcile(state);
            } else {
                self.remote_players.insert(state.id, state);
                self.interp_buffers.entry(state.id).or_default().push(state);
            }
        }
    }

    fn handle_world_snapshot(&mut self, buffer: &mut PacketBuffer) {
        if self.state != ConnectionState::Connected {
            return;
        }

        let player_count = buffer.read_u8();
        for _ in 0..player_count {
            let state = buffer.read_player_state();
            if state.id == self.player_id {
                self.local_state = state;
                self.last_server_state = state;
            } else {
                self.remote_players.insert(state.id, state);
                self.interp_buffers.entry(state.id).or_default().push(state);
            }
        }

        let entity_count = buffer.read_u8();
        for _ in 0..entity_count {
            let entity = buffer.read_entity_state();
            self.events.push_back(ClientEvent::EntityCreated {
                id: entity.id,
                kind: entity.kind,
                position: entity.position,
            });
        }

        log::info!(
            "world snapshot: {} players, {} entities",
            player_count,
            entity_count
        );
    }

    fn handle_entity_create(&mut self, buffer: &mut PacketBuffer) {
        if self.state != ConnectionState::Connected {
            return;
        }

        let id = buffer.read_u32();
        let kind = buffer.read_u8();
        let position = buffer.read_vec3();

        if kind == EntityState::ENTITY_PLAYER {
            let state = PlayerState {
                id,
                position,
                ..Default::default()
            };
            self.remote_players.insert(id, state);
        }

        log::debug!("entity {} created (type {})", id, kind);
        self.events
            .push_back(ClientEvent::EntityCreated { id, kind, position });
    }

    fn handle_entity_destroy(&mut self, buffer: &mut PacketBuffer) {
        if self.state != ConnectionState::Connected {
            return;
        }

        let id = buffer.read_u32();

        self.remote_players.remove(&id);
        self.interp_buffers.remove(&id);

        log::debug!("entity {} destroyed", id);
        self.events.push_back(ClientEvent::EntityDestroyed { id });
    }

    /// Folds an authoritative state for the local player into the
    /// prediction. Replays every still-unacknowledged input on top of the
    /// server state, then corrects position only — yaw and pitch belong to
    /// the renderer.
    fn reconcile(&mut self, server_state: PlayerState) {
        self.last_server_state = server_state;
        self.history.acknowledge_up_to(server_state.last_processed_input);

        let mut reconciled = server_state;
        for input in self.history.unacknowledged() {
            apply_input(&mut reconciled, input);
        }

        let error = reconciled.position.distance(self.local_state.position);
        if error < ERROR_THRESHOLD {
            return;
        }

        if error < SNAP_THRESHOLD {
            let delta = reconciled.position - self.local_state.position;
            self.local_state.position += delta * BLEND_FACTOR;
        } else {
            log::debug!("prediction error {:.2}, snapping", error);
            self.local_state.position = reconciled.position;
        }
    }

    fn send_plain(&mut self, kind: PacketType) {
        let (ack, ack_bits) = self.acks.ack_fields();
        let sequence = self.acks.next_sequence();
        self.tracker.track(sequence);

        let mut header = PacketHeader::new(kind);
        header.sequence = sequence;
        header.ack = ack;
        header.ack_bits = ack_bits;
        header.tick = self.server_tick;

        let mut buffer = PacketBuffer::new();
        buffer.write_header(&header);

        if let (Some(transport), Some(addr)) = (self.transport.as_mut(), self.server_addr) {
            transport.send(buffer.as_slice(), addr);
        }
        self.last_send_time = Instant::now();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let client = Client::new(ClientConfig::default());
        assert!(!client.is_connected());
        assert!(!client.is_connecting());
        assert_eq!(client.player_count(), 1);
    }

    #[test]
    fn send_input_while_disconnected_is_a_no_op() {
        let mut client = Client::new(ClientConfig::default());
        let before = *client.local_state();

        client.send_input(&PlayerInput {
            keys: PlayerInput::KEY_FORWARD,
            delta_time: 0.1,
            ..Default::default()
        });

        assert_eq!(*client.local_state(), before);
        assert_eq!(client.input_sequence, 0);
    }

    #[test]
    fn disconnect_when_idle_emits_nothing() {
        let mut client = Client::new(ClientConfig::default());
        client.disconnect();
        assert!(client.poll_events().is_empty());
    }

    #[test]
    fn connect_rejects_bad_address() {
        let mut client = Client::new(ClientConfig::default());
        let result = client.connect("definitely not an address", 7777);
        assert!(matches!(result, Err(NetError::Address(_))));
        assert!(!client.is_connecting());
    }

    #[test]
    fn connecting_gives_up_after_timeout() {
        let mut client = Client::new(ClientConfig {
            connection_timeout: Duration::from_millis(50),
            ..Default::default()
        });

        // Nothing listens on this port.
        client.connect("127.0.0.1", 19999).unwrap();
        assert!(client.is_connecting());

        let start = Instant::now();
        while client.is_connecting() && start.elapsed() < Duration::from_secs(2) {
            client.update(0.016);
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(!client.is_connecting());
        assert!(!client.is_connected());
        assert!(client.poll_events().contains(&ClientEvent::Disconnected));
    }
}
