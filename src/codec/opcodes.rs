//! Opcode tables for both directions of the OT wire protocol.
//!
//! `0x65..=0x68` and `0x6D` appear on both sides with different meanings
//! (walks client-side, map slices / creature moves server-side); the
//! packet direction disambiguates.

use crate::codec::types::Direction;

/// Client → server opcodes.
pub mod client {
    pub const LOGOUT: u8 = 0x14;
    pub const PING: u8 = 0x1E;
    pub const AUTO_WALK: u8 = 0x64;
    pub const WALK_NORTH: u8 = 0x65;
    pub const WALK_EAST: u8 = 0x66;
    pub const WALK_SOUTH: u8 = 0x67;
    pub const WALK_WEST: u8 = 0x68;
    pub const STOP_WALK: u8 = 0x69;
    pub const WALK_NORTHEAST: u8 = 0x6A;
    pub const WALK_SOUTHEAST: u8 = 0x6B;
    pub const WALK_SOUTHWEST: u8 = 0x6C;
    pub const WALK_NORTHWEST: u8 = 0x6D;
    pub const TURN_NORTH: u8 = 0x6F;
    pub const TURN_EAST: u8 = 0x70;
    pub const TURN_SOUTH: u8 = 0x71;
    pub const TURN_WEST: u8 = 0x72;
    pub const MOVE_THING: u8 = 0x78;
    pub const USE_ITEM: u8 = 0x82;
    pub const USE_ITEM_EX: u8 = 0x83;
    pub const USE_ON_CREATURE: u8 = 0x84;
    pub const LOOK: u8 = 0x8C;
    pub const SAY: u8 = 0x96;
    pub const SET_FIGHT_MODES: u8 = 0xA0;
    pub const ATTACK: u8 = 0xA1;
    pub const FOLLOW: u8 = 0xA2;
}

/// Server → client opcodes.
pub mod server {
    pub const LOGIN_OR_PENDING: u8 = 0x0A;
    pub const PING: u8 = 0x1D;
    pub const MAP_DESCRIPTION: u8 = 0x64;
    pub const MAP_SLICE_NORTH: u8 = 0x65;
    pub const MAP_SLICE_EAST: u8 = 0x66;
    pub const MAP_SLICE_SOUTH: u8 = 0x67;
    pub const MAP_SLICE_WEST: u8 = 0x68;
    pub const TILE_ADD_THING: u8 = 0x6A;
    pub const TILE_TRANSFORM_THING: u8 = 0x6B;
    pub const TILE_REMOVE_THING: u8 = 0x6C;
    pub const CREATURE_MOVE: u8 = 0x6D;
    pub const WORLD_LIGHT: u8 = 0x82;
    pub const MAGIC_EFFECT: u8 = 0x83;
    pub const ANIMATED_TEXT: u8 = 0x84;
    pub const SHOOT_EFFECT: u8 = 0x85;
    pub const CREATURE_HEALTH: u8 = 0x8C;
    pub const CREATURE_LIGHT: u8 = 0x8D;
    pub const CREATURE_SPEED: u8 = 0x8F;
    pub const CREATURE_SKULL: u8 = 0x90;
    pub const CREATURE_PARTY: u8 = 0x91;
    pub const PLAYER_STATS: u8 = 0xA0;
    pub const PLAYER_SKILLS: u8 = 0xA1;
    pub const PLAYER_ICONS: u8 = 0xA2;
    pub const PLAYER_CANCEL_ATTACK: u8 = 0xA3;
    pub const TEXT_MESSAGE: u8 = 0xB4;
    pub const PLAYER_CANCEL_WALK: u8 = 0xB5;
    pub const FLOOR_CHANGE_UP: u8 = 0xBE;
    pub const FLOOR_CHANGE_DOWN: u8 = 0xBF;
}

/// Walk opcode for a direction.
pub fn walk_opcode(direction: Direction) -> u8 {
    match direction {
        Direction::North => client::WALK_NORTH,
        Direction::East => client::WALK_EAST,
        Direction::South => client::WALK_SOUTH,
        Direction::West => client::WALK_WEST,
        Direction::NorthEast => client::WALK_NORTHEAST,
        Direction::SouthEast => client::WALK_SOUTHEAST,
        Direction::SouthWest => client::WALK_SOUTHWEST,
        Direction::NorthWest => client::WALK_NORTHWEST,
    }
}

/// Direction for a client walk opcode, if it is one.
pub fn walk_direction(opcode: u8) -> Option<Direction> {
    match opcode {
        client::WALK_NORTH => Some(Direction::North),
        client::WALK_EAST => Some(Direction::East),
        client::WALK_SOUTH => Some(Direction::South),
        client::WALK_WEST => Some(Direction::West),
        client::WALK_NORTHEAST => Some(Direction::NorthEast),
        client::WALK_SOUTHEAST => Some(Direction::SouthEast),
        client::WALK_SOUTHWEST => Some(Direction::SouthWest),
        client::WALK_NORTHWEST => Some(Direction::NorthWest),
        _ => None,
    }
}

/// Turn opcode for a cardinal direction; diagonals fall back to the
/// nearest cardinal on the x axis.
pub fn turn_opcode(direction: Direction) -> u8 {
    match direction {
        Direction::North => client::TURN_NORTH,
        Direction::South => client::TURN_SOUTH,
        Direction::East | Direction::NorthEast | Direction::SouthEast => client::TURN_EAST,
        Direction::West | Direction::NorthWest | Direction::SouthWest => client::TURN_WEST,
    }
}
