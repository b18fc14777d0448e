use crate::codec::types::Position;

/// Binary writer for OT payloads, the symmetric side of `PacketReader`.
pub struct PacketWriter {
    data: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a u16-length-prefixed Latin-1 string. Code points outside
    /// Latin-1 are written as `?`.
    pub fn write_string(&mut self, s: &str) {
        let bytes: Vec<u8> = s
            .chars()
            .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
            .collect();
        self.write_u16(bytes.len() as u16);
        self.data.extend_from_slice(&bytes);
    }

    pub fn write_position(&mut self, pos: Position) {
        self.write_u16(pos.x);
        self.write_u16(pos.y);
        self.write_u8(pos.z);
    }
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl From<PacketWriter> for Vec<u8> {
    fn from(writer: PacketWriter) -> Self {
        writer.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::reader::PacketReader;

    #[test]
    fn test_roundtrip_primitives() {
        let mut writer = PacketWriter::new();
        writer.write_u8(0x42);
        writer.write_u16(0x1234);
        writer.write_u32(0xDEADBEEF);
        writer.write_u64(0x0102030405060708);

        let data = writer.into_vec();
        let mut reader = PacketReader::new(&data);

        assert_eq!(reader.read_u8().unwrap(), 0x42);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_u64().unwrap(), 0x0102030405060708);
    }

    #[test]
    fn test_roundtrip_string() {
        let mut writer = PacketWriter::new();
        writer.write_string("exura vita");

        let data = writer.into_vec();
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_string().unwrap(), "exura vita");
    }

    #[test]
    fn test_roundtrip_position() {
        let pos = Position::new(32100, 31987, 7);
        let mut writer = PacketWriter::new();
        writer.write_position(pos);

        let data = writer.into_vec();
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_position().unwrap(), pos);
    }

    #[test]
    fn test_non_latin1_replaced() {
        let mut writer = PacketWriter::new();
        writer.write_string("a€b");
        let data = writer.into_vec();
        assert_eq!(&data, &[0x03, 0x00, b'a', b'?', b'b']);
    }
}
