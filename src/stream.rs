use std::io;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::types::Guid;

/// Reusable byte stream object serializers write to and read from.
///
/// The replicator owns two of these (one per direction) and re-initializes
/// them every use to avoid per-object allocations. All multi-byte values are
/// little-endian.
pub struct NetworkStream {
    buffer: Vec<u8>,
    read_pos: usize,
    reading: bool,
}

impl NetworkStream {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            read_pos: 0,
            reading: false,
        }
    }

    /// Resets the stream for writing, keeping the allocated capacity.
    pub fn initialize(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
        self.reading = false;
    }

    /// Resets the stream for reading the given payload.
    pub fn initialize_read(&mut self, data: &[u8]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(data);
        self.read_pos = 0;
        self.reading = true;
    }

    /// Bytes written so far (write mode) or consumed so far (read mode).
    pub fn position(&self) -> usize {
        if self.reading {
            return self.read_pos;
        }
        self.buffer.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn has_more(&self) -> bool {
        self.read_pos < self.buffer.len()
    }

    /// Releases the backing allocation. Called on shutdown.
    pub fn free(&mut self) {
        self.buffer = Vec::new();
        self.read_pos = 0;
        self.reading = false;
    }

    // Writing //

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.write_u8(value).unwrap();
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.write_u16::<LittleEndian>(value).unwrap();
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.write_u32::<LittleEndian>(value).unwrap();
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buffer.write_u64::<LittleEndian>(value).unwrap();
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buffer.write_f32::<LittleEndian>(value).unwrap();
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buffer.write_f64::<LittleEndian>(value).unwrap();
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn write_guid(&mut self, guid: &Guid) {
        self.buffer.extend_from_slice(&guid.to_bytes());
    }

    // Reading //

    fn take(&mut self, count: usize) -> io::Result<&[u8]> {
        if self.read_pos + count > self.buffer.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let slice = &self.buffer[self.read_pos..self.read_pos + count];
        self.read_pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> io::Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> io::Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_f32(&mut self) -> io::Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    pub fn read_f64(&mut self) -> io::Result<f64> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    pub fn read_bool(&mut self) -> io::Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_bytes(&mut self, count: usize) -> io::Result<&[u8]> {
        self.take(count)
    }

    pub fn read_guid(&mut self) -> io::Result<Guid> {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(self.take(16)?);
        Ok(Guid::from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn write_then_read_back() {
        let guid = Guid::new(Uuid::new_v4());
        let mut stream = NetworkStream::new();
        stream.initialize();
        stream.write_u8(7);
        stream.write_u32(123_456);
        stream.write_f32(1.5);
        stream.write_bool(true);
        stream.write_guid(&guid);
        let written = stream.bytes().to_vec();

        stream.initialize_read(&written);
        assert_eq!(stream.read_u8().unwrap(), 7);
        assert_eq!(stream.read_u32().unwrap(), 123_456);
        assert_eq!(stream.read_f32().unwrap(), 1.5);
        assert!(stream.read_bool().unwrap());
        assert_eq!(stream.read_guid().unwrap(), guid);
        assert!(!stream.has_more());
    }

    #[test]
    fn truncated_read_errors() {
        let mut stream = NetworkStream::new();
        stream.initialize_read(&[1, 2]);
        assert!(stream.read_u32().is_err());
    }

    #[test]
    fn initialize_resets_position() {
        let mut stream = NetworkStream::new();
        stream.initialize();
        stream.write_u32(9);
        assert_eq!(stream.position(), 4);
        stream.initialize();
        assert_eq!(stream.position(), 0);
    }
}
