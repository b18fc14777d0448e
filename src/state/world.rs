use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::codec::Position;
use crate::state::events::{EventKind, ServerEvent};

/// Valid creature ID range on OT servers.
pub const CREATURE_ID_MIN: u32 = 0x1000_0000;
pub const CREATURE_ID_MAX: u32 = 0x8000_0000;
/// Monster IDs start here; lower IDs are players and NPCs.
pub const MONSTER_ID_MIN: u32 = 0x4000_0000;

const TILE_UPDATE_CAPACITY: usize = 50;
const SERVER_EVENT_CAPACITY: usize = 100;
/// Creatures unseen for this long are pruned (bridge entries exempt).
const CREATURE_STALE_AFTER: Duration = Duration::from_secs(120);
const PRUNE_INTERVAL: Duration = Duration::from_secs(1);
/// How long an authoritative bridge position suppresses relative map
/// slice adjustments.
const BRIDGE_POSITION_FRESH: Duration = Duration::from_secs(2);

/// Who last wrote a creature entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatureSource {
    Proxy,
    Bridge,
}

#[derive(Debug, Clone)]
pub struct CreatureInfo {
    /// Health percentage, 0..=100.
    pub health: u8,
    pub x: u16,
    pub y: u16,
    pub z: u8,
    pub name: String,
    pub last_seen: Instant,
    pub source: CreatureSource,
}

impl CreatureInfo {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}

/// A timestamped tile change observed in the stream.
#[derive(Debug, Clone, Copy)]
pub struct TileUpdate {
    pub at: Instant,
    pub pos: Position,
}

/// The live world model. Single writer (the relay's server→client
/// subtask plus explicit setters); many readers through `SharedWorld`.
#[derive(Debug)]
pub struct WorldModel {
    pub player_id: u32,
    pub position: Position,
    pub hp: u32,
    pub max_hp: u32,
    pub mana: u32,
    pub max_mana: u32,
    pub capacity: u32,
    pub experience: u64,
    pub level: u16,
    pub magic_level: u8,
    pub soul: u8,
    pub speed: u16,
    pub player_icons: u16,
    pub world_light_level: u8,
    pub world_light_color: u8,

    creatures: HashMap<u32, CreatureInfo>,
    tile_updates: VecDeque<TileUpdate>,
    server_events: VecDeque<ServerEvent>,

    pub attack_target_id: u32,
    pub lure_active: bool,
    pub in_protection_zone: bool,

    pub last_cant_throw: Option<Instant>,
    pub cancel_walk_time: Option<Instant>,
    pub stats_updated_at: Option<Instant>,
    pub last_map_time: Option<Instant>,
    bridge_position_at: Option<Instant>,
    last_prune: Option<Instant>,
}

impl WorldModel {
    pub fn new() -> Self {
        Self {
            player_id: 0,
            position: Position::new(0, 0, 0),
            hp: 0,
            max_hp: 0,
            mana: 0,
            max_mana: 0,
            capacity: 0,
            experience: 0,
            level: 0,
            magic_level: 0,
            soul: 0,
            speed: 0,
            player_icons: 0,
            world_light_level: 0,
            world_light_color: 0,
            creatures: HashMap::new(),
            tile_updates: VecDeque::with_capacity(TILE_UPDATE_CAPACITY),
            server_events: VecDeque::with_capacity(SERVER_EVENT_CAPACITY),
            attack_target_id: 0,
            lure_active: false,
            in_protection_zone: false,
            last_cant_throw: None,
            cancel_walk_time: None,
            stats_updated_at: None,
            last_map_time: None,
            bridge_position_at: None,
            last_prune: None,
        }
    }

    // ── Creatures ──────────────────────────────────────────────────

    pub fn creatures(&self) -> &HashMap<u32, CreatureInfo> {
        &self.creatures
    }

    pub fn creature(&self, id: u32) -> Option<&CreatureInfo> {
        self.creatures.get(&id)
    }

    /// Insert or refresh a proxy-sourced creature. Bridge entries keep
    /// their position data; only health and freshness are refreshed.
    pub fn upsert_creature(&mut self, id: u32, health: u8, name: &str, z: u8) {
        if !(CREATURE_ID_MIN..CREATURE_ID_MAX).contains(&id) {
            return;
        }
        match self.creatures.get_mut(&id) {
            Some(existing) if existing.source == CreatureSource::Bridge => {
                existing.health = health;
                existing.last_seen = Instant::now();
            }
            _ => {
                self.creatures.insert(
                    id,
                    CreatureInfo {
                        health,
                        x: self.position.x,
                        y: self.position.y,
                        z,
                        name: name.to_string(),
                        last_seen: Instant::now(),
                        source: CreatureSource::Proxy,
                    },
                );
            }
        }
    }

    /// Apply an authoritative creature record from the bridge.
    pub fn apply_bridge_creature(&mut self, id: u32, health: u8, pos: Position, name: &str) {
        if !(CREATURE_ID_MIN..CREATURE_ID_MAX).contains(&id) {
            return;
        }
        self.creatures.insert(
            id,
            CreatureInfo {
                health,
                x: pos.x,
                y: pos.y,
                z: pos.z,
                name: name.to_string(),
                last_seen: Instant::now(),
                source: CreatureSource::Bridge,
            },
        );
    }

    /// Update health of an already-known creature. Never creates an
    /// entry: misaligned scans must not spawn phantoms.
    pub fn update_creature_health(&mut self, id: u32, health: u8) {
        if let Some(creature) = self.creatures.get_mut(&id) {
            creature.health = health;
            creature.last_seen = Instant::now();
        }
    }

    pub fn remove_creature(&mut self, id: u32) {
        self.creatures.remove(&id);
    }

    /// Drop all creatures not owned by the bridge (map change).
    pub fn clear_proxy_creatures(&mut self) {
        self.creatures
            .retain(|_, info| info.source == CreatureSource::Bridge);
    }

    /// Remove stale non-bridge creatures. Throttled to once per second;
    /// callers may invoke it on every scan.
    pub fn prune_creatures(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_prune {
            if now.duration_since(last) < PRUNE_INTERVAL {
                return;
            }
        }
        self.last_prune = Some(now);
        self.creatures.retain(|_, info| {
            info.source == CreatureSource::Bridge
                || now.duration_since(info.last_seen) <= CREATURE_STALE_AFTER
        });
    }

    /// Alive monsters within `radius` (Chebyshev) of the player.
    pub fn nearby_monsters(&self, radius: u32) -> Vec<(u32, &CreatureInfo)> {
        self.creatures
            .iter()
            .filter(|(id, info)| {
                **id >= MONSTER_ID_MIN
                    && info.health > 0
                    && info.health <= 100
                    && info.z == self.position.z
                    && self.position.chebyshev(&info.position()) <= radius
            })
            .map(|(id, info)| (*id, info))
            .collect()
    }

    // ── Position ───────────────────────────────────────────────────

    pub fn set_position(&mut self, pos: Position) {
        self.position = pos;
    }

    pub fn set_position_from_bridge(&mut self, pos: Position) {
        self.position = pos;
        self.bridge_position_at = Some(Instant::now());
    }

    /// True while the bridge is supplying authoritative positions, in
    /// which case relative map-slice adjustments are skipped.
    pub fn bridge_position_fresh(&self) -> bool {
        self.bridge_position_at
            .map(|at| at.elapsed() < BRIDGE_POSITION_FRESH)
            .unwrap_or(false)
    }

    /// Shift the position by a map-slice delta, clamping at map bounds.
    pub fn shift_position(&mut self, dx: i16, dy: i16) {
        if self.bridge_position_fresh() {
            return;
        }
        self.position.x = self.position.x.saturating_add_signed(dx);
        self.position.y = self.position.y.saturating_add_signed(dy);
    }

    // ── Rings ──────────────────────────────────────────────────────

    pub fn push_tile_update(&mut self, pos: Position) {
        if self.tile_updates.len() == TILE_UPDATE_CAPACITY {
            self.tile_updates.pop_front();
        }
        self.tile_updates.push_back(TileUpdate {
            at: Instant::now(),
            pos,
        });
    }

    pub fn tile_updates(&self) -> impl Iterator<Item = &TileUpdate> {
        self.tile_updates.iter()
    }

    /// Any tile change at `pos` observed after `since`?
    pub fn tile_updated_since(&self, pos: Position, since: Instant) -> bool {
        self.tile_updates
            .iter()
            .any(|update| update.at >= since && update.pos == pos)
    }

    pub fn push_event(&mut self, kind: EventKind, pos: Position) {
        if self.server_events.len() == SERVER_EVENT_CAPACITY {
            self.server_events.pop_front();
        }
        self.server_events.push_back(ServerEvent {
            at: Instant::now(),
            kind,
            pos,
        });
    }

    pub fn server_events(&self) -> impl Iterator<Item = &ServerEvent> {
        self.server_events.iter()
    }

    /// First floor-change event strictly after `since`, if any.
    pub fn floor_change_since(&self, since: Instant) -> Option<ServerEvent> {
        self.server_events
            .iter()
            .find(|event| event.at > since && event.kind.is_floor_change())
            .copied()
    }

    pub fn cancel_walk_since(&self, since: Instant) -> bool {
        self.cancel_walk_time.map(|at| at > since).unwrap_or(false)
    }
}

impl Default for WorldModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to the world model: one writer discipline, snapshot
/// reads for everyone else.
#[derive(Clone)]
pub struct SharedWorld {
    inner: Arc<RwLock<WorldModel>>,
}

impl SharedWorld {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(WorldModel::new())),
        }
    }

    pub fn read(&self) -> std::sync::RwLockReadGuard<'_, WorldModel> {
        self.inner.read().unwrap()
    }

    pub fn write(&self) -> std::sync::RwLockWriteGuard<'_, WorldModel> {
        self.inner.write().unwrap()
    }

    pub fn position(&self) -> Position {
        self.read().position
    }

    /// Reset for a fresh session. The bridge re-pushes its creatures on
    /// its next snapshot.
    pub fn reset(&self) {
        let mut world = self.write();
        *world = WorldModel::new();
    }
}

impl Default for SharedWorld {
    fn default() -> Self {
        Self::new()
    }
}
