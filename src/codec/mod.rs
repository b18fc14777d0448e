//! Typed cursor reader/writer over decrypted OT payloads, the opcode
//! tables for both directions, and builders for client packets.

pub mod builders;
pub mod opcodes;
pub mod reader;
pub mod types;
pub mod writer;

pub use opcodes::{client, server};
pub use reader::PacketReader;
pub use types::{Direction, Position};
pub use writer::PacketWriter;
