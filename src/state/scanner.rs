//! Packet scanner: turns decrypted server payloads into world model
//! mutations.
//!
//! OT servers bundle many messages per frame. The scanner walks the
//! stream sequentially while it can consume messages exactly, stops at
//! the first variable-length body it cannot skip (map data, character
//! lists), then falls back to a targeted search of the remainder for the
//! few opcodes worth fishing out of tile data. It is total: any byte
//! sequence terminates without panicking, and handlers never suspend.

use tracing::{debug, info};

use crate::codec::{server, Position};
use crate::state::events::EventKind;
use crate::state::world::{WorldModel, CREATURE_ID_MAX, CREATURE_ID_MIN};

const PLAYER_STATS_LEN: usize = 36;
const PLAYER_SKILLS_LEN: usize = 14;
const CANT_THROW_MARKER: &[u8] = b"can't throw there";

/// Scan a full decrypted payload and apply everything recognized.
pub fn scan(payload: &[u8], world: &mut WorldModel) {
    let mut pos = 0usize;
    let mut found_stats = false;
    let mut has_map_data = false;

    while pos < payload.len() {
        let opcode = payload[pos];
        pos += 1;
        if matches!(opcode, 0x0A | 0x64..=0x68) {
            has_map_data = true;
        }
        match parse_at(opcode, payload, pos, world) {
            Some(new_pos) => {
                if opcode == server::PLAYER_STATS {
                    found_stats = true;
                }
                pos = new_pos;
            }
            None => break,
        }
    }

    if pos < payload.len() {
        if !found_stats {
            search_for_stats(payload, pos, world);
        }
        search_for_icons(payload, pos, world);
        search_for_tile_updates(payload, pos, world);
    }

    if has_map_data {
        scan_for_creatures(payload, world);
    }

    world.prune_creatures();
}

/// Parse one message body starting at `pos` (just past the opcode).
/// Returns the offset after the message, or `None` when the body is
/// unknown or cannot be skipped.
fn parse_at(opcode: u8, data: &[u8], pos: usize, world: &mut WorldModel) -> Option<usize> {
    match opcode {
        server::PING => Some(pos),

        server::LOGIN_OR_PENDING => {
            let id = read_u32(data, pos)?;
            if id != 0 {
                world.player_id = id;
                info!(player_id = id, "login: player id set");
            }
            // The map description follows a few flag bytes; find it and
            // take the absolute position. Tile data after it is opaque.
            let search_end = (pos + 4 + 10).min(data.len().saturating_sub(5));
            for i in pos + 4..search_end {
                if data[i] == server::MAP_DESCRIPTION {
                    if let Some(position) = read_position(data, i + 1) {
                        if position.is_valid() {
                            world.set_position(position);
                            world.clear_proxy_creatures();
                            world.last_map_time = Some(std::time::Instant::now());
                            info!(%position, "login position");
                            break;
                        }
                    }
                }
            }
            None
        }

        server::MAP_DESCRIPTION => {
            if let Some(position) = read_position(data, pos) {
                if position.is_valid() {
                    world.set_position(position);
                    world.clear_proxy_creatures();
                    world.last_map_time = Some(std::time::Instant::now());
                    debug!(%position, "map description");
                }
            }
            None
        }

        server::MAP_SLICE_NORTH | server::MAP_SLICE_EAST | server::MAP_SLICE_SOUTH
        | server::MAP_SLICE_WEST => {
            let (dx, dy) = match opcode {
                server::MAP_SLICE_NORTH => (0, -1),
                server::MAP_SLICE_EAST => (1, 0),
                server::MAP_SLICE_SOUTH => (0, 1),
                _ => (-1, 0),
            };
            world.shift_position(dx, dy);
            world.last_map_time = Some(std::time::Instant::now());
            None
        }

        server::TILE_ADD_THING | server::TILE_TRANSFORM_THING | server::TILE_REMOVE_THING => {
            let position = read_position(data, pos)?;
            let _stack = *data.get(pos + 5)?;
            if position.is_valid() {
                world.push_tile_update(position);
            }
            Some(pos + 6)
        }

        server::CREATURE_MOVE => skip(data, pos, 11),

        server::WORLD_LIGHT => {
            world.world_light_level = *data.get(pos)?;
            world.world_light_color = *data.get(pos + 1)?;
            Some(pos + 2)
        }

        server::MAGIC_EFFECT => skip(data, pos, 6),
        server::SHOOT_EFFECT => skip(data, pos, 11),

        server::ANIMATED_TEXT => {
            // pos(5) + color(1) + string
            let text_len = read_u16(data, pos + 6)? as usize;
            skip(data, pos, 8 + text_len)
        }

        server::CREATURE_HEALTH => {
            let id = read_u32(data, pos)?;
            let health = *data.get(pos + 4)?;
            world.update_creature_health(id, health);
            Some(pos + 5)
        }

        server::CREATURE_LIGHT => skip(data, pos, 6),

        server::CREATURE_SPEED => {
            let id = read_u32(data, pos)?;
            let speed = read_u16(data, pos + 4)?;
            if id == world.player_id && world.player_id != 0 {
                world.speed = speed;
            }
            Some(pos + 6)
        }

        server::CREATURE_SKULL | server::CREATURE_PARTY => skip(data, pos, 5),

        server::PLAYER_STATS => {
            if pos + PLAYER_STATS_LEN > data.len() {
                return None;
            }
            apply_player_stats(&data[pos..pos + PLAYER_STATS_LEN], world);
            Some(pos + PLAYER_STATS_LEN)
        }

        server::PLAYER_SKILLS => skip(data, pos, PLAYER_SKILLS_LEN),

        server::PLAYER_ICONS => {
            world.player_icons = read_u16(data, pos)?;
            Some(pos + 2)
        }

        server::PLAYER_CANCEL_ATTACK => {
            world.attack_target_id = 0;
            Some(pos)
        }

        server::TEXT_MESSAGE => {
            let _kind = *data.get(pos)?;
            let text_len = read_u16(data, pos + 1)? as usize;
            let end = pos + 3 + text_len;
            let text = data.get(pos + 3..end)?;
            if contains(text, CANT_THROW_MARKER) {
                world.last_cant_throw = Some(std::time::Instant::now());
            }
            Some(end)
        }

        server::PLAYER_CANCEL_WALK => {
            let _direction = *data.get(pos)?;
            world.cancel_walk_time = Some(std::time::Instant::now());
            let position = world.position;
            world.push_event(EventKind::CancelWalk, position);
            Some(pos + 1)
        }

        server::FLOOR_CHANGE_UP => {
            world.position.z = world.position.z.saturating_sub(1);
            let position = world.position;
            world.push_event(EventKind::FloorChangeUp, position);
            None
        }

        server::FLOOR_CHANGE_DOWN => {
            world.position.z = (world.position.z + 1).min(15);
            let position = world.position;
            world.push_event(EventKind::FloorChangeDown, position);
            None
        }

        _ => None,
    }
}

fn apply_player_stats(body: &[u8], world: &mut WorldModel) {
    // u32 hp, u32 max_hp, u32 capacity, u64 exp, u16 level, u8 lvl%,
    // u32 mana, u32 max_mana, u8 mlvl, u8 mlvl%, u8 soul, u16 stamina
    world.hp = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    world.max_hp = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    world.capacity = u32::from_le_bytes([body[8], body[9], body[10], body[11]]);
    world.experience = u64::from_le_bytes([
        body[12], body[13], body[14], body[15], body[16], body[17], body[18], body[19],
    ]);
    world.level = u16::from_le_bytes([body[20], body[21]]);
    world.mana = u32::from_le_bytes([body[23], body[24], body[25], body[26]]);
    world.max_mana = u32::from_le_bytes([body[27], body[28], body[29], body[30]]);
    world.magic_level = body[31];
    world.soul = body[33];
    world.stats_updated_at = Some(std::time::Instant::now());
    debug!(
        hp = world.hp,
        max_hp = world.max_hp,
        mana = world.mana,
        level = world.level,
        "player stats"
    );
}

/// Brute-force search for a plausible PLAYER_STATS block after the
/// sequential parse stopped. Tight sanity bounds keep tile data from
/// producing false positives.
fn search_for_stats(data: &[u8], start: usize, world: &mut WorldModel) {
    if data.len() < 1 + PLAYER_STATS_LEN {
        return;
    }
    for i in start..data.len() - PLAYER_STATS_LEN {
        if data[i] != server::PLAYER_STATS {
            continue;
        }
        let body = &data[i + 1..i + 1 + PLAYER_STATS_LEN];
        let hp = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        let max_hp = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
        let level = u16::from_le_bytes([body[20], body[21]]);
        let mana = u32::from_le_bytes([body[23], body[24], body[25], body[26]]);
        let max_mana = u32::from_le_bytes([body[27], body[28], body[29], body[30]]);
        if max_hp == 0 || max_hp > 50_000 || hp > max_hp {
            continue;
        }
        if level == 0 || level > 5_000 {
            continue;
        }
        if max_mana > 50_000 || mana > max_mana {
            continue;
        }
        apply_player_stats(body, world);
        debug!(offset = i, "stats found via fallback search");
        return;
    }
}

fn search_for_icons(data: &[u8], start: usize, world: &mut WorldModel) {
    if data.len() < 3 {
        return;
    }
    for i in start..data.len() - 2 {
        if data[i] != server::PLAYER_ICONS {
            continue;
        }
        let icons = u16::from_le_bytes([data[i + 1], data[i + 2]]);
        if icons < 0x8000 {
            world.player_icons = icons;
            return;
        }
    }
}

fn search_for_tile_updates(data: &[u8], start: usize, world: &mut WorldModel) {
    if data.len() < 7 {
        return;
    }
    let mut i = start;
    while i < data.len() - 6 {
        let opcode = data[i];
        if matches!(
            opcode,
            server::TILE_ADD_THING | server::TILE_TRANSFORM_THING | server::TILE_REMOVE_THING
        ) {
            if let Some(position) = read_position(data, i + 1) {
                if position.is_valid() {
                    world.push_tile_update(position);
                    i += 7;
                    continue;
                }
            }
        }
        i += 1;
    }
}

/// Fish creature records out of map data. The `0x61 0x00` marker opens
/// an unknown-creature block: `u32 remove_id, u32 creature_id,
/// u16 name_len, name, u8 health, u8 direction, ...`. Validation is
/// strict because this runs over raw tile bytes.
fn scan_for_creatures(data: &[u8], world: &mut WorldModel) {
    let mut found = 0usize;
    let mut i = 0usize;
    while i + 2 < data.len() {
        if data[i] != 0x61 || data[i + 1] != 0x00 {
            i += 1;
            continue;
        }
        let Some(record) = parse_creature_record(data, i + 2) else {
            i += 1;
            continue;
        };
        let z = world.position.z;
        world.upsert_creature(record.id, record.health, &record.name, z);
        found += 1;
        i = record.end;
    }
    if found > 0 {
        debug!(found, total = world.creatures().len(), "creature scan");
    }
}

struct CreatureRecord {
    id: u32,
    name: String,
    health: u8,
    end: usize,
}

fn parse_creature_record(data: &[u8], start: usize) -> Option<CreatureRecord> {
    let remove_id = read_u32(data, start)?;
    if remove_id != 0 && remove_id < CREATURE_ID_MIN {
        return None;
    }
    let id = read_u32(data, start + 4)?;
    if !(CREATURE_ID_MIN..CREATURE_ID_MAX).contains(&id) {
        return None;
    }
    let name_len = read_u16(data, start + 8)? as usize;
    if !(1..=30).contains(&name_len) {
        return None;
    }
    let name_bytes = data.get(start + 10..start + 10 + name_len)?;
    if !name_bytes[0].is_ascii_uppercase() {
        return None;
    }
    if !name_bytes
        .iter()
        .all(|&b| b == b' ' || b == b'\'' || b.is_ascii_alphabetic())
    {
        return None;
    }
    let after_name = start + 10 + name_len;
    let health = *data.get(after_name)?;
    let direction = *data.get(after_name + 1)?;
    if health > 100 || direction > 3 {
        return None;
    }
    Some(CreatureRecord {
        id,
        name: name_bytes.iter().map(|&b| b as char).collect(),
        health,
        // Skip past the outfit block so we don't rescan the same region.
        end: after_name + 2 + 10,
    })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn skip(data: &[u8], pos: usize, n: usize) -> Option<usize> {
    if pos + n <= data.len() {
        Some(pos + n)
    } else {
        None
    }
}

fn read_u16(data: &[u8], pos: usize) -> Option<u16> {
    let bytes = data.get(pos..pos + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    let bytes = data.get(pos..pos + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_position(data: &[u8], pos: usize) -> Option<Position> {
    Some(Position {
        x: read_u16(data, pos)?,
        y: read_u16(data, pos + 2)?,
        z: *data.get(pos + 4)?,
    })
}
