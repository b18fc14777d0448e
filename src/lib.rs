//! otbot — a man-in-the-middle automation proxy for Open Tibia style
//! game clients.
//!
//! The proxy terminates the client's encrypted sessions, captures the
//! XTEA key during login, parses the server stream into a live world
//! model, and drives the character by injecting forged packets back into
//! the same cryptographic channel. A supervisor hosts cooperative
//! automation tasks (Lua tasklets, waypoint recording/playback) on top.

pub mod bot;
pub mod bridge;
pub mod cavebot;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod daemon;
pub mod error;
pub mod protocol;
pub mod state;
pub mod supervisor;

pub use error::{Error, Result};

pub use bot::{BotContext, TaskHost};
pub use cavebot::{build_actions_map, ActionNode, PlaybackEngine, Recorder, Recording};
pub use codec::{Direction, PacketReader, PacketWriter, Position};
pub use config::Config;
pub use crypto::{adler32, RsaKey, XteaKey};
pub use protocol::{Relay, RelayConfig, RelayHandle, Session, SessionRole};
pub use state::{SharedWorld, WorldModel};
pub use supervisor::Supervisor;
