//! Authoritative host simulation.
//!
//! The host owns the truth: one fixed-rate tick loop applies queued player
//! inputs in sequence order, and a slower broadcast loop ships the full
//! roster to every connected peer. Wall-clock drift is absorbed by the
//! accumulators; `current_tick` advances by exactly one per simulation step.
//!
//! ```text
//! update(dt):
//!   drain socket ──▶ dispatch packets ──▶ check timeouts
//!   tick accumulator   (60 Hz)  ──▶ apply pending inputs per connection
//!   snapshot accumulator (20 Hz) ──▶ STATE_UPDATE to each peer
//!   heartbeat check     (1 Hz)  ──▶ keepalive to quiet peers
//! ```

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use glam::Vec3;

use crate::codec::PacketBuffer;
use crate::connection::{Connection, ConnectionState, ConnectionTable};
use crate::movement::apply_input;
use crate::protocol::{
    EntityState, PacketHeader, PacketType, PlayerInput, PlayerState, CONNECTION_TIMEOUT,
    HEARTBEAT_INTERVAL, MAX_PLAYERS, SNAPSHOT_INTERVAL, TICK_INTERVAL,
};
use crate::transport::{NetError, NetworkStats, UdpTransport};

/// Events surfaced to the shell, drained via [`Host::poll_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    PlayerConnected { id: u32 },
    PlayerDisconnected { id: u32 },
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub max_players: usize,
    pub tick_interval: f32,
    pub snapshot_interval: f32,
    pub connection_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_players: MAX_PLAYERS,
            tick_interval: TICK_INTERVAL,
            snapshot_interval: SNAPSHOT_INTERVAL,
            connection_timeout: Duration::from_secs_f32(CONNECTION_TIMEOUT),
            heartbeat_interval: Duration::from_secs_f32(HEARTBEAT_INTERVAL),
        }
    }
}

pub struct Host {
    config: HostConfig,
    transport: Option<UdpTransport>,
    connections: ConnectionTable,
    players: HashMap<u32, PlayerState>,
    world_entities: Vec<EntityState>,
    current_tick: u32,
    tick_accumulator: f32,
    snapshot_accumulator: f32,
    events: VecDeque<HostEvent>,
}

impl Host {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            transport: None,
            connections: ConnectionTable::new(),
            players: HashMap::new(),
            world_entities: static_world(),
            current_tick: 0,
            tick_accumulator: 0.0,
            snapshot_accumulator: 0.0,
            events: VecDeque::new(),
        }
    }

    /// Binds the socket and seeds the local host player (id 0). A host that
    /// was stopped can be started again on a fresh port.
    pub fn start(&mut self, port: u16) -> Result<(), NetError> {
        let transport = UdpTransport::bind(port)?;
        if let Ok(addr) = transport.local_addr() {
            log::info!("host listening on {}", addr);
        }

        self.transport = Some(transport);
        self.connections = ConnectionTable::new();
        self.players.clear();
        self.players.insert(0, PlayerState::spawn(0));
        self.events.clear();
        self.current_tick = 0;
        self.tick_accumulator = 0.0;
        self.snapshot_accumulator = 0.0;
        Ok(())
    }

    /// Notifies every peer and releases the socket.
    pub fn stop(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            let tick = self.current_tick;
            for conn in self.connections.iter_mut() {
                let header = stamped_header(conn, PacketType::Disconnect, tick);
                let mut buffer = PacketBuffer::new();
                buffer.write_header(&header);
                transport.send(buffer.as_slice(), conn.addr);
            }
            log::info!("host stopped");
        }

        self.transport = None;
        self.connections = ConnectionTable::new();
        self.players.clear();
    }

    pub fn is_running(&self) -> bool {
        self.transport.is_some()
    }

    /// Drives the host. Must be called regularly; `dt` is the wall-clock
    /// delta since the previous call in seconds.
    pub fn update(&mut self, dt: f32) {
        if self.transport.is_none() {
            return;
        }

        self.receive_packets();
        self.check_timeouts();

        self.tick_accumulator += dt;
        while self.tick_accumulator >= self.config.tick_interval {
            self.advance_tick();
            self.tick_accumulator -= self.config.tick_interval;
        }

        self.snapshot_accumulator += dt;
        if self.snapshot_accumulator >= self.config.snapshot_interval {
            self.broadcast_state();
            self.snapshot_accumulator -= self.config.snapshot_interval;
        }

        self.send_heartbeats();
    }

    /// Applies input for the local host player immediately, outside the
    /// per-connection queues.
    pub fn process_local_input(&mut self, input: &PlayerInput) {
        let tick = self.current_tick;
        let state = self.players.entry(0).or_insert_with(|| PlayerState::spawn(0));
        apply_input(state, input);
        state.tick = tick;
    }

    pub fn local_player(&mut self) -> &mut PlayerState {
        self.players.entry(0).or_insert_with(|| PlayerState::spawn(0))
    }

    pub fn players(&self) -> &HashMap<u32, PlayerState> {
        &self.players
    }

    pub fn current_tick(&self) -> u32 {
        self.current_tick
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Smoothed round-trip estimate to a peer, seconds.
    pub fn peer_rtt(&self, player_id: u32) -> Option<f32> {
        self.connections.get(player_id).map(|c| c.rtt())
    }

    pub fn stats(&self) -> NetworkStats {
        self.transport
            .as_ref()
            .map(|t| t.stats())
            .unwrap_or_default()
    }

    /// Drains events emitted since the last call.
    pub fn poll_events(&mut self) -> Vec<HostEvent> {
        self.events.drain(..).collect()
    }

    fn receive_packets(&mut self) {
        let datagrams = match self.transport.as_mut() {
            Some(transport) => transport.receive_all(),
            None => return,
        };

        for (bytes, addr) in datagrams {
            let mut buffer = PacketBuffer::from_bytes(&bytes);
            let header = buffer.read_header();
            if !header.is_valid() {
                continue;
            }
            self.handle_packet(&header, &mut buffer, addr);
        }
    }

    fn handle_packet(&mut self, header: &PacketHeader, buffer: &mut PacketBuffer, addr: SocketAddr) {
        match header.packet_type() {
            Some(PacketType::ConnectRequest) => self.handle_connect_request(addr),
            Some(PacketType::Disconnect) => self.handle_peer_disconnect(addr),
            Some(PacketType::Heartbeat) | Some(PacketType::Ack) => {
                if let Some(conn) = self.connections.get_by_addr_mut(&addr) {
                    conn.touch();
                    conn.acks.on_receive(header.sequence);
                    conn.tracker.process_ack(header.ack, header.ack_bits);
                }
            }
            Some(PacketType::Input) => self.handle_input(header, buffer, addr),
            // Unknown or unexpected types are dropped silently.
            _ => {}
        }
    }

    fn handle_connect_request(&mut self, addr: SocketAddr) {
        if let Some(conn) = self.connections.get_by_addr_mut(&addr) {
            // Our accept was lost; answer again without creating anything.
            conn.touch();
            let player_id = conn.player_id;
            self.send_connect_accept(player_id);
            return;
        }

        if self.players.len() >= self.config.max_players {
            log::warn!("rejecting {}: roster full", addr);
            self.send_connect_reject(addr);
            return;
        }

        let conn = self.connections.insert(addr);
        let player_id = conn.player_id;
        self.players.insert(player_id, PlayerState::spawn(player_id));

        log::info!("player {} connected from {}", player_id, addr);

        self.send_connect_accept(player_id);
        self.send_world_snapshot(player_id);
        self.broadcast_entity_create(player_id);

        self.events.push_back(HostEvent::PlayerConnected { id: player_id });
    }

    fn handle_peer_disconnect(&mut self, addr: SocketAddr) {
        let Some(conn) = self.connections.get_by_addr_mut(&addr) else {
            return;
        };
        let player_id = conn.player_id;

        log::info!("player {} disconnected", player_id);

        self.connections.remove(player_id);
        self.players.remove(&player_id);
        self.broadcast_entity_destroy(player_id);
        self.events
            .push_back(HostEvent::PlayerDisconnected { id: player_id });
    }

    fn handle_input(&mut self, header: &PacketHeader, buffer: &mut PacketBuffer, addr: SocketAddr) {
        let Some(conn) = self.connections.get_by_addr_mut(&addr) else {
            return;
        };
        if conn.state != ConnectionState::Connected {
            return;
        }

        conn.touch();
        conn.acks.on_receive(header.sequence);
        conn.tracker.process_ack(header.ack, header.ack_bits);

        // Each packet carries a redundant burst of recent inputs. A corrupt
        // payload size truncates to whole records and never faults.
        let count = header.payload_size as usize / PlayerInput::WIRE_SIZE;
        for _ in 0..count {
            let input = buffer.read_player_input();
            if input.sequence > conn.last_processed_input {
                conn.pending_inputs.push_back(input);
            }
        }
    }

    fn advance_tick(&mut self) {
        self.current_tick += 1;
        let tick = self.current_tick;

        let players = &mut self.players;
        for conn in self.connections.iter_mut() {
            while let Some(input) = conn.pending_inputs.pop_front() {
                if input.sequence <= conn.last_processed_input {
                    continue;
                }
                if let Some(state) = players.get_mut(&conn.player_id) {
                    apply_input(state, &input);
                    state.tick = tick;
                    state.last_processed_input = input.sequence;
                }
                conn.last_processed_input = input.sequence;
            }
        }
    }

    fn broadcast_state(&mut self) {
        let tick = self.current_tick;
        let players = &self.players;
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        for conn in self.connections.iter_mut() {
            if conn.state != ConnectionState::Connected {
                continue;
            }

            let header = stamped_header(conn, PacketType::StateUpdate, tick);
            let mut buffer = PacketBuffer::new();
            buffer.write_header(&header);
            buffer.write_u8(players.len() as u8);
            for state in players.values() {
                buffer.write_player_state(state);
            }
            buffer.patch_payload_size();

            transport.send(buffer.as_slice(), conn.addr);
            conn.last_send_time = Instant::now();
        }
    }

    fn send_connect_accept(&mut self, player_id: u32) {
        let tick = self.current_tick;
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let Some(conn) = self.connections.get_mut(player_id) else {
            return;
        };

        let header = stamped_header(conn, PacketType::ConnectAccept, tick);
        let mut buffer = PacketBuffer::new();
        buffer.write_header(&header);
        buffer.write_u32(player_id);
        buffer.write_u32(tick);
        buffer.patch_payload_size();

        transport.send(buffer.as_slice(), conn.addr);
        conn.last_send_time = Instant::now();
    }

    fn send_connect_reject(&mut self, addr: SocketAddr) {
        let tick = self.current_tick;
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        let mut header = PacketHeader::new(PacketType::ConnectReject);
        header.tick = tick;
        let mut buffer = PacketBuffer::new();
        buffer.write_header(&header);
        transport.send(buffer.as_slice(), addr);
    }

    fn send_world_snapshot(&mut self, player_id: u32) {
        let tick = self.current_tick;
        let players = &self.players;
        let entities = &self.world_entities;
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let Some(conn) = self.connections.get_mut(player_id) else {
            return;
        };

        let header = stamped_header(conn, PacketType::WorldSnapshot, tick);
        let mut buffer = PacketBuffer::new();
        buffer.write_header(&header);

        buffer.write_u8(players.len() as u8);
        for state in players.values() {
            buffer.write_player_state(state);
        }

        buffer.write_u8(entities.len() as u8);
        for entity in entities {
            buffer.write_entity_state(entity);
        }
        buffer.patch_payload_size();

        transport.send(buffer.as_slice(), conn.addr);
        conn.last_send_time = Instant::now();
    }

    fn broadcast_entity_create(&mut self, player_id: u32) {
        let tick = self.current_tick;
        let Some(position) = self.players.get(&player_id).map(|p| p.position) else {
            return;
        };
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        for conn in self.connections.iter_mut() {
            if conn.state != ConnectionState::Connected || conn.player_id == player_id {
                continue;
            }

            let header = stamped_header(conn, PacketType::EntityCreate, tick);
            let mut buffer = PacketBuffer::new();
            buffer.write_header(&header);
            buffer.write_u32(player_id);
            buffer.write_u8(EntityState::ENTITY_PLAYER);
            buffer.write_vec3(position);
            buffer.patch_payload_size();

            transport.send(buffer.as_slice(), conn.addr);
            conn.last_send_time = Instant::now();
        }
    }

    fn broadcast_entity_destroy(&mut self, entity_id: u32) {
        let tick = self.current_tick;
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        for conn in self.connections.iter_mut() {
            if conn.state != ConnectionState::Connected {
                continue;
            }

            let header = stamped_header(conn, PacketType::EntityDestroy, tick);
            let mut buffer = PacketBuffer::new();
            buffer.write_header(&header);
            buffer.write_u32(entity_id);
            buffer.patch_payload_size();

            transport.send(buffer.as_slice(), conn.addr);
            conn.last_send_time = Instant::now();
        }
    }

    fn send_heartbeats(&mut self) {
        let tick = self.current_tick;
        let interval = self.config.heartbeat_interval;
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        for conn in self.connections.iter_mut() {
            if conn.state != ConnectionState::Connected
                || conn.last_send_time.elapsed() < interval
            {
                continue;
            }

            let header = stamped_header(conn, PacketType::Heartbeat, tick);
            let mut buffer = PacketBuffer::new();
            buffer.write_header(&header);
            transport.send(buffer.as_slice(), conn.addr);
            conn.last_send_time = Instant::now();
        }
    }

    fn check_timeouts(&mut self) {
        for player_id in self.connections.timed_out(self.config.connection_timeout) {
            log::info!("player {} timed out", player_id);
            self.connections.remove(player_id);
            self.players.remove(&player_id);
            self.broadcast_entity_destroy(player_id);
            self.events
                .push_back(HostEvent::PlayerDisconnected { id: player_id });
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stamps an outbound header with the connection's sequence and ack state.
fn stamped_header(conn: &mut Connection, kind: PacketType, tick: u32) -> PacketHeader {
    let (ack, ack_bits) = conn.acks.ack_fields();
    let sequence = conn.acks.next_sequence();
    conn.tracker.track(sequence);

    let mut header = PacketHeader::new(kind);
    header.sequence = sequence;
    header.ack = ack;
    header.ack_bits = ack_bits;
    header.tick = tick;
    header
}

/// The fixed entities every world snapshot enumerates.
fn static_world() -> Vec<EntityState> {
    vec![
        EntityState::fixed(1, Vec3::new(0.0, 1.0, 0.0)),
        EntityState::fixed(2, Vec3::new(5.0, 1.0, 3.0)),
        EntityState::fixed(3, Vec3::new(-3.0, 0.5, -5.0)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_seeds_local_player() {
        let mut host = Host::new(HostConfig::default());
        host.start(0).expect("bind ephemeral");

        assert!(host.is_running());
        assert_eq!(host.player_count(), 1);

        let local = host.local_player();
        assert_eq!(local.id, 0);
        assert_eq!(local.yaw, -90.0);
    }

    #[test]
    fn local_input_applies_immediately() {
        let mut host = Host::new(HostConfig::default());
        host.start(0).unwrap();

        let input = PlayerInput {
            keys: PlayerInput::KEY_FORWARD,
            yaw: 0.0,
            delta_time: 0.1,
            ..Default::default()
        };
        let before = host.local_player().position;
        host.process_local_input(&input);
        let after = host.local_player().position;

        assert!((after.x - before.x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn accumulator_advances_ticks() {
        let mut host = Host::new(HostConfig::default());
        host.start(0).unwrap();

        host.update(0.04);
        assert_eq!(host.current_tick(), 2);

        // The remainder carries over instead of being dropped.
        host.update(0.04);
        assert_eq!(host.current_tick(), 4);
    }

    #[test]
    fn stop_releases_state() {
        let mut host = Host::new(HostConfig::default());
        host.start(0).unwrap();
        host.update(0.04);

        host.stop();
        assert!(!host.is_running());
        assert_eq!(host.player_count(), 0);

        // update after stop is a no-op
        host.update(1.0);
        assert_eq!(host.current_tick(), 2);
    }

    #[test]
    fn restart_resets_tick() {
        let mut host = Host::new(HostConfig::default());
        host.start(0).unwrap();
        host.update(1.0);
        assert!(host.current_tick() > 0);

        host.stop();
        host.start(0).unwrap();
        assert_eq!(host.current_tick(), 0);
        assert_eq!(host.player_count(), 1);
    }

    #[test]
    fn world_has_three_static_cubes() {
        let world = static_world();
        assert_eq!(world.len(), 3);
        assert!(world.iter().all(|e| e.kind == EntityState::ENTITY_STATIC));
        assert_eq!(world[2].position, Vec3::new(-3.0, 0.5, -5.0));
    }
}
