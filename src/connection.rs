//! Per-peer connection state and the host's connection table.
//!
//! Peers are identified by endpoint address; there is no session token or
//! challenge. The table owns one [`Connection`] per player id and keeps a
//! reverse index from address to id for packet dispatch.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::protocol::PlayerInput;
use crate::reliability::{AckState, AckTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug)]
pub struct Connection {
    pub player_id: u32,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub acks: AckState,
    pub tracker: AckTracker,
    pub last_receive_time: Instant,
    pub last_send_time: Instant,
    /// Inputs waiting for the next simulation tick, in arrival order.
    pub pending_inputs: VecDeque<PlayerInput>,
    /// Highest input sequence already applied; lower-or-equal sequences are
    /// discarded without side effect.
    pub last_processed_input: u32,
}

impl Connection {
    pub fn new(player_id: u32, addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            player_id,
            addr,
            state: ConnectionState::Connected,
            acks: AckState::new(),
            tracker: AckTracker::new(),
            last_receive_time: now,
            last_send_time: now,
            pending_inputs: VecDeque::new(),
            last_processed_input: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    /// Smoothed round-trip estimate in seconds.
    pub fn rtt(&self) -> f32 {
        self.tracker.srtt()
    }
}

#[derive(Debug, Default)]
pub struct ConnectionTable {
    by_id: HashMap<u32, Connection>,
    by_addr: HashMap<SocketAddr, u32>,
    next_player_id: u32,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_addr: HashMap::new(),
            // The host player is 0; peers start at 1.
            next_player_id: 1,
        }
    }

    /// Registers a new peer and assigns the next monotonic player id.
    pub fn insert(&mut self, addr: SocketAddr) -> &mut Connection {
        let player_id = self.next_player_id;
        self.next_player_id += 1;

        self.by_addr.insert(addr, player_id);
        self.by_id
            .entry(player_id)
            .or_insert_with(|| Connection::new(player_id, addr))
    }

    pub fn get(&self, player_id: u32) -> Option<&Connection> {
        self.by_id.get(&player_id)
    }

    pub fn get_mut(&mut self, player_id: u32) -> Option<&mut Connection> {
        self.by_id.get_mut(&player_id)
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut Connection> {
        let id = *self.by_addr.get(addr)?;
        self.by_id.get_mut(&id)
    }

    pub fn remove(&mut self, player_id: u32) -> Option<Connection> {
        let conn = self.by_id.remove(&player_id)?;
        self.by_addr.remove(&conn.addr);
        Some(conn)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.by_id.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.by_id.values_mut()
    }

    /// Ids of every peer that has gone silent for longer than `timeout`.
    pub fn timed_out(&self, timeout: Duration) -> Vec<u32> {
        self.by_id
            .values()
            .filter(|c| c.is_timed_out(timeout))
            .map(|c| c.player_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_addr.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn ids_are_monotonic() {
        let mut table = ConnectionTable::new();
        let a = table.insert(addr(5000)).player_id;
        let b = table.insert(addr(5001)).player_id;
        let c = table.insert(addr(5002)).player_id;

        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[test]
    fn address_lookup() {
        let mut table = ConnectionTable::new();
        table.insert(addr(5000));
        table.insert(addr(5001));

        let conn = table.get_by_addr_mut(&addr(5001)).unwrap();
        assert_eq!(conn.player_id, 2);
        assert!(table.get_by_addr_mut(&addr(5999)).is_none());
    }

    #[test]
    fn remove_clears_both_indices() {
        let mut table = ConnectionTable::new();
        let id = table.insert(addr(5000)).player_id;

        let removed = table.remove(id).unwrap();
        assert_eq!(removed.addr, addr(5000));
        assert!(table.get(id).is_none());
        assert!(table.get_by_addr_mut(&addr(5000)).is_none());

        // A reconnect from the same address gets a fresh id.
        let fresh = table.insert(addr(5000)).player_id;
        assert_eq!(fresh, 2);
    }

    #[test]
    fn timeout_detection() {
        let mut table = ConnectionTable::new();
        let id = table.insert(addr(5000)).player_id;

        assert!(table.timed_out(Duration::from_secs(10)).is_empty());

        std::thread::sleep(Duration::from_millis(15));
        let gone = table.timed_out(Duration::from_millis(5));
        assert_eq!(gone, vec![id]);

        table.get_mut(id).unwrap().touch();
        assert!(table.timed_out(Duration::from_millis(5)).is_empty());
    }

    #[test]
    fn stale_input_filter_field() {
        let mut conn = Connection::new(1, addr(5000));
        assert_eq!(conn.last_processed_input, 0);
        conn.last_processed_input = 7;

        let stale = PlayerInput {
            sequence: 7,
            ..Default::default()
        };
        assert!(stale.sequence <= conn.last_processed_input);
    }
}
