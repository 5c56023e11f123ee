//! Bounded little-endian serialization buffer.
//!
//! [`PacketBuffer`] is deliberately tolerant: reads that run off the end of
//! the received data yield zero, and writes that would overflow the datagram
//! are dropped. A corrupted packet must never crash the receiver; garbage in
//! the header fails the magic check and garbage in a payload decodes to
//! harmless zeroed records.

use glam::Vec3;

use crate::protocol::{
    EntityState, PacketHeader, PlayerInput, PlayerState, MAX_PACKET_SIZE, PROTOCOL_MAGIC,
};

/// Serialized size of a [`PacketHeader`].
pub const HEADER_SIZE: usize = 23;

/// Fixed-capacity wire buffer with independent read and write cursors.
#[derive(Clone)]
pub struct PacketBuffer {
    data: [u8; MAX_PACKET_SIZE],
    write_pos: usize,
    read_pos: usize,
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PACKET_SIZE],
            write_pos: 0,
            read_pos: 0,
        }
    }

    /// Wraps received datagram bytes for reading. Oversized input is
    /// truncated to the buffer capacity.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::new();
        let len = bytes.len().min(MAX_PACKET_SIZE);
        buffer.data[..len].copy_from_slice(&bytes[..len]);
        buffer.write_pos = len;
        buffer
    }

    pub fn len(&self) -> usize {
        self.write_pos
    }

    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.write_pos]
    }

    pub fn reset(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
    }

    /// Rewinds the read cursor to the start of the buffer.
    pub fn rewind(&mut self) {
        self.read_pos = 0;
    }

    pub fn write_u8(&mut self, value: u8) {
        if self.write_pos < MAX_PACKET_SIZE {
            self.data[self.write_pos] = value;
            self.write_pos += 1;
        }
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_u8(value as u8);
        self.write_u8((value >> 8) as u8);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_u16(value as u16);
        self.write_u16((value >> 16) as u16);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.write_pos + bytes.len() <= MAX_PACKET_SIZE {
            self.data[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
            self.write_pos += bytes.len();
        }
    }

    pub fn read_u8(&mut self) -> u8 {
        if self.read_pos < self.write_pos {
            let value = self.data[self.read_pos];
            self.read_pos += 1;
            value
        } else {
            0
        }
    }

    pub fn read_u16(&mut self) -> u16 {
        let low = self.read_u8() as u16;
        low | (self.read_u8() as u16) << 8
    }

    pub fn read_u32(&mut self) -> u32 {
        let low = self.read_u16() as u32;
        low | (self.read_u16() as u32) << 16
    }

    pub fn read_f32(&mut self) -> f32 {
        f32::from_bits(self.read_u32())
    }

    pub fn read_vec3(&mut self) -> Vec3 {
        let x = self.read_f32();
        let y = self.read_f32();
        let z = self.read_f32();
        Vec3::new(x, y, z)
    }

    pub fn write_header(&mut self, header: &PacketHeader) {
        self.write_bytes(&header.magic);
        self.write_u8(header.kind);
        self.write_u32(header.sequence);
        self.write_u32(header.ack);
        self.write_u32(header.ack_bits);
        self.write_u32(header.tick);
        self.write_u16(header.payload_size);
    }

    pub fn read_header(&mut self) -> PacketHeader {
        let mut magic = [0u8; 4];
        for byte in &mut magic {
            *byte = self.read_u8();
        }
        PacketHeader {
            magic,
            kind: self.read_u8(),
            sequence: self.read_u32(),
            ack: self.read_u32(),
            ack_bits: self.read_u32(),
            tick: self.read_u32(),
            payload_size: self.read_u16(),
        }
    }

    /// Rewrites the header's `payload_size` field after the payload has been
    /// appended. The header must have been written at offset zero.
    pub fn patch_payload_size(&mut self) {
        let payload = self.write_pos.saturating_sub(HEADER_SIZE) as u16;
        if self.write_pos >= HEADER_SIZE && self.data[..4] == PROTOCOL_MAGIC {
            self.data[HEADER_SIZE - 2] = payload as u8;
            self.data[HEADER_SIZE - 1] = (payload >> 8) as u8;
        }
    }

    pub fn write_player_input(&mut self, input: &PlayerInput) {
        self.write_u32(input.sequence);
        self.write_u32(input.tick);
        self.write_u8(input.keys);
        self.write_f32(input.yaw);
        self.write_f32(input.pitch);
        self.write_f32(input.delta_time);
    }

    pub fn read_player_input(&mut self) -> PlayerInput {
        PlayerInput {
            sequence: self.read_u32(),
            tick: self.read_u32(),
            keys: self.read_u8(),
            yaw: self.read_f32(),
            pitch: self.read_f32(),
            delta_time: self.read_f32(),
        }
    }

    pub fn write_player_state(&mut self, state: &PlayerState) {
        self.write_u32(state.id);
        self.write_u32(state.tick);
        self.write_vec3(state.position);
        self.write_f32(state.yaw);
        self.write_f32(state.pitch);
        self.write_u32(state.last_processed_input);
    }

    pub fn read_player_state(&mut self) -> PlayerState {
        PlayerState {
            id: self.read_u32(),
            tick: self.read_u32(),
            position: self.read_vec3(),
            yaw: self.read_f32(),
            pitch: self.read_f32(),
            last_processed_input: self.read_u32(),
        }
    }

    pub fn write_entity_state(&mut self, entity: &EntityState) {
        self.write_u32(entity.id);
        self.write_u8(entity.kind);
        self.write_vec3(entity.position);
        self.write_vec3(entity.velocity);
        self.write_f32(entity.yaw);
        self.write_f32(entity.pitch);
    }

    pub fn read_entity_state(&mut self) -> EntityState {
        EntityState {
            id: self.read_u32(),
            kind: self.read_u8(),
            position: self.read_vec3(),
            velocity: self.read_vec3(),
            yaw: self.read_f32(),
            pitch: self.read_f32(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketType;

    #[test]
    fn primitive_round_trip() {
        let mut buffer = PacketBuffer::new();
        buffer.write_u8(0xAB);
        buffer.write_u16(0x1234);
        buffer.write_u32(0xDEADBEEF);
        buffer.write_f32(3.14159);
        buffer.write_vec3(Vec3::new(1.5, 2.5, 3.5));

        buffer.rewind();

        assert_eq!(buffer.read_u8(), 0xAB);
        assert_eq!(buffer.read_u16(), 0x1234);
        assert_eq!(buffer.read_u32(), 0xDEADBEEF);
        assert!((buffer.read_f32() - 3.14159).abs() < 1e-4);
        let v = buffer.read_vec3();
        assert!((v.x - 1.5).abs() < 1e-3);
        assert!((v.y - 2.5).abs() < 1e-3);
        assert!((v.z - 3.5).abs() < 1e-3);
    }

    #[test]
    fn float_bits_survive_exactly() {
        for value in [0.0f32, -0.0, 1.0, -1.5, f32::MIN_POSITIVE, 1e30, -1e-30] {
            let mut buffer = PacketBuffer::new();
            buffer.write_f32(value);
            buffer.rewind();
            assert_eq!(buffer.read_f32().to_bits(), value.to_bits());
        }
    }

    #[test]
    fn header_round_trip() {
        let mut header = PacketHeader::new(PacketType::StateUpdate);
        header.sequence = 12345;
        header.ack = 12340;
        header.ack_bits = 0xFFFFFFFF;
        header.tick = 9999;
        header.payload_size = 128;

        let mut buffer = PacketBuffer::new();
        buffer.write_header(&header);
        assert_eq!(buffer.len(), HEADER_SIZE);

        buffer.rewind();
        let decoded = buffer.read_header();
        assert!(decoded.is_valid());
        assert_eq!(decoded, header);
    }

    #[test]
    fn corrupt_magic_is_invalid() {
        let mut header = PacketHeader::new(PacketType::StateUpdate);
        header.sequence = 1;

        let mut buffer = PacketBuffer::new();
        buffer.write_header(&header);

        let mut bytes = buffer.as_slice().to_vec();
        bytes[0] = b'X';
        let mut corrupt = PacketBuffer::from_bytes(&bytes);
        assert!(!corrupt.read_header().is_valid());
    }

    #[test]
    fn truncated_read_yields_zero() {
        let mut buffer = PacketBuffer::from_bytes(&[0x01]);
        assert_eq!(buffer.read_u32(), 0x01);
        assert_eq!(buffer.read_u32(), 0);
        assert_eq!(buffer.read_f32(), 0.0);

        let state = buffer.read_player_state();
        assert_eq!(state, PlayerState::default());
    }

    #[test]
    fn overflowing_write_is_dropped() {
        let mut buffer = PacketBuffer::new();
        for _ in 0..MAX_PACKET_SIZE {
            buffer.write_u8(0xFF);
        }
        assert_eq!(buffer.len(), MAX_PACKET_SIZE);

        buffer.write_u32(0xDEADBEEF);
        buffer.write_vec3(Vec3::ONE);
        assert_eq!(buffer.len(), MAX_PACKET_SIZE);
    }

    #[test]
    fn player_input_round_trip() {
        let input = PlayerInput {
            sequence: 42,
            tick: 100,
            keys: 0x15,
            yaw: 45.0,
            pitch: -10.0,
            delta_time: 0.016,
        };

        let mut buffer = PacketBuffer::new();
        buffer.write_player_input(&input);
        assert_eq!(buffer.len(), PlayerInput::WIRE_SIZE);

        buffer.rewind();
        assert_eq!(buffer.read_player_input(), input);
    }

    #[test]
    fn player_state_round_trip() {
        let state = PlayerState {
            id: 5,
            tick: 200,
            position: Vec3::new(10.0, 20.0, 30.0),
            yaw: 90.0,
            pitch: 45.0,
            last_processed_input: 150,
        };

        let mut buffer = PacketBuffer::new();
        buffer.write_player_state(&state);
        buffer.rewind();
        assert_eq!(buffer.read_player_state(), state);
    }

    #[test]
    fn entity_state_round_trip() {
        let entity = EntityState {
            id: 7,
            kind: EntityState::ENTITY_STATIC,
            position: Vec3::new(-3.0, 0.5, -5.0),
            velocity: Vec3::new(0.1, 0.0, -0.2),
            yaw: 10.0,
            pitch: -5.0,
        };

        let mut buffer = PacketBuffer::new();
        buffer.write_entity_state(&entity);
        buffer.rewind();
        assert_eq!(buffer.read_entity_state(), entity);
    }

    #[test]
    fn payload_size_patching() {
        let mut buffer = PacketBuffer::new();
        buffer.write_header(&PacketHeader::new(PacketType::Input));
        buffer.write_player_input(&PlayerInput::default());
        buffer.write_player_input(&PlayerInput::default());
        buffer.patch_payload_size();

        buffer.rewind();
        let header = buffer.read_header();
        assert_eq!(header.payload_size as usize, 2 * PlayerInput::WIRE_SIZE);
    }
}
