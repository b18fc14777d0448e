//! Builders for client → server packets. Each returns the full payload
//! starting with the client opcode byte, ready for the injection queue.

use crate::codec::opcodes::{client, turn_opcode, walk_opcode};
use crate::codec::types::{Direction, Position};
use crate::codec::writer::PacketWriter;

pub fn walk(direction: Direction) -> Vec<u8> {
    vec![walk_opcode(direction)]
}

pub fn turn(direction: Direction) -> Vec<u8> {
    vec![turn_opcode(direction)]
}

pub fn stop_walk() -> Vec<u8> {
    vec![client::STOP_WALK]
}

pub fn ping() -> Vec<u8> {
    vec![client::PING]
}

pub fn logout() -> Vec<u8> {
    vec![client::LOGOUT]
}

/// Regular chat message (talk type 1).
pub fn say(text: &str) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(4 + text.len());
    w.write_u8(client::SAY);
    w.write_u8(0x01);
    w.write_string(text);
    w.into_vec()
}

pub fn attack(creature_id: u32) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(5);
    w.write_u8(client::ATTACK);
    w.write_u32(creature_id);
    w.into_vec()
}

pub fn follow(creature_id: u32) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(5);
    w.write_u8(client::FOLLOW);
    w.write_u32(creature_id);
    w.into_vec()
}

pub fn use_item(pos: Position, item_id: u16, stack_pos: u8, index: u8) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(10);
    w.write_u8(client::USE_ITEM);
    w.write_position(pos);
    w.write_u16(item_id);
    w.write_u8(stack_pos);
    w.write_u8(index);
    w.into_vec()
}

pub fn use_item_ex(
    from: Position,
    item_id: u16,
    stack_pos: u8,
    to: Position,
    to_stack_pos: u8,
) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(15);
    w.write_u8(client::USE_ITEM_EX);
    w.write_position(from);
    w.write_u16(item_id);
    w.write_u8(stack_pos);
    w.write_position(to);
    w.write_u8(to_stack_pos);
    w.into_vec()
}

pub fn use_on_creature(pos: Position, item_id: u16, stack_pos: u8, creature_id: u32) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(13);
    w.write_u8(client::USE_ON_CREATURE);
    w.write_position(pos);
    w.write_u16(item_id);
    w.write_u8(stack_pos);
    w.write_u32(creature_id);
    w.into_vec()
}

pub fn look_at(pos: Position, item_id: u16, stack_pos: u8) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(9);
    w.write_u8(client::LOOK);
    w.write_position(pos);
    w.write_u16(item_id);
    w.write_u8(stack_pos);
    w.into_vec()
}

pub fn move_thing(from: Position, item_id: u16, stack_pos: u8, to: Position, count: u8) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(15);
    w.write_u8(client::MOVE_THING);
    w.write_position(from);
    w.write_u16(item_id);
    w.write_u8(stack_pos);
    w.write_position(to);
    w.write_u8(count);
    w.into_vec()
}

pub fn set_fight_modes(fight_mode: u8, chase_mode: u8, safe_mode: u8) -> Vec<u8> {
    vec![client::SET_FIGHT_MODES, fight_mode, chase_mode, safe_mode]
}
