//! Live world model reconstructed from the server packet stream.

pub mod events;
pub mod scanner;
pub mod world;

pub use events::{EventKind, ServerEvent};
pub use world::{CreatureInfo, CreatureSource, SharedWorld, WorldModel};
