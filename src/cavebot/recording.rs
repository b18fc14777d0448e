//! Waypoint recording: an observer on the client packet stream captures
//! walks and item interactions, a slow tick folds in server events
//! (floor changes, walk cancellations), and recordings persist as one
//! JSON file per name.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codec::{opcodes, Direction, PacketReader, Position};
use crate::error::{Error, Result};
use crate::state::events::EventKind;
use crate::state::SharedWorld;

/// A walk waypoint's direction: a keyboard step or a client autowalk
/// (where `pos` is the final destination rather than one step away).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalkKind {
    North,
    East,
    South,
    West,
    NorthEast,
    SouthEast,
    SouthWest,
    NorthWest,
    Autowalk,
}

impl From<Direction> for WalkKind {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::North => WalkKind::North,
            Direction::East => WalkKind::East,
            Direction::South => WalkKind::South,
            Direction::West => WalkKind::West,
            Direction::NorthEast => WalkKind::NorthEast,
            Direction::SouthEast => WalkKind::SouthEast,
            Direction::SouthWest => WalkKind::SouthWest,
            Direction::NorthWest => WalkKind::NorthWest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloorDirection {
    Up,
    Down,
}

/// One recorded event plus the player position at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Waypoint {
    Walk {
        direction: WalkKind,
        /// Destination tile (player_pos + direction offset for keyboard
        /// walks, the final destination for autowalks).
        pos: Position,
        #[serde(skip_serializing_if = "Option::is_none")]
        player_pos: Option<Position>,
        t: f64,
    },
    UseItem {
        x: u16,
        y: u16,
        z: u8,
        item_id: u16,
        stack_pos: u8,
        index: u8,
        label: String,
        pos: Position,
        t: f64,
    },
    UseItemEx {
        from_pos: Position,
        item_id: u16,
        stack_pos: u8,
        to_pos: Position,
        to_stack_pos: u8,
        pos: Position,
        t: f64,
    },
    FloorChange {
        direction: FloorDirection,
        pos: Position,
        z: u8,
        t: f64,
    },
    CancelWalk {
        direction: u8,
        pos: Position,
        t: f64,
    },
    /// Legacy position samples; ignored by the compiler.
    Position { pos: Position, t: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub name: String,
    /// Unix timestamp, seconds.
    pub created_at: u64,
    pub version: u32,
    pub start_position: Position,
    pub waypoints: Vec<Waypoint>,
}

fn auto_label(item_id: u16) -> String {
    format!("Use item {item_id}")
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// On-disk store: `<dir>/<name>.json`, one recording per file.
#[derive(Debug, Clone)]
pub struct RecordingStore {
    dir: PathBuf,
}

/// Summary row for `list_recordings`.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingSummary {
    pub name: String,
    pub waypoints: usize,
    pub created_at: u64,
}

impl RecordingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        self.validate_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }

    /// Names are restricted to `[A-Za-z0-9_-]`.
    pub fn validate_name(&self, name: &str) -> Result<()> {
        if valid_name(name) {
            Ok(())
        } else {
            Err(Error::InvalidRecordingName(name.to_string()))
        }
    }

    pub fn save(&self, recording: &Recording) -> Result<()> {
        let path = self.path_for(&recording.name)?;
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(recording)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Recording> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(Error::RecordingNotFound(name.to_string()));
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        if path.exists() {
            std::fs::remove_file(path)?;
            info!(name, "recording deleted");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn list(&self) -> Vec<RecordingSummary> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut out: Vec<RecordingSummary> = entries
            .flatten()
            .filter(|entry| {
                entry.path().extension().map(|e| e == "json").unwrap_or(false)
            })
            .filter_map(|entry| {
                let json = std::fs::read_to_string(entry.path()).ok()?;
                let recording: Recording = serde_json::from_str(&json).ok()?;
                Some(RecordingSummary {
                    name: recording.name,
                    waypoints: recording.waypoints.len(),
                    created_at: recording.created_at,
                })
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

struct ActiveRecording {
    name: String,
    start_position: Position,
    started_at: Instant,
    last_event_drain: Instant,
    waypoints: Vec<Waypoint>,
}

/// Waypoint recorder. `observer()` yields the closure to register on the
/// relay's client packet list; `drain_server_events` is called from the
/// supervisor's recorder tick.
#[derive(Clone)]
pub struct Recorder {
    world: SharedWorld,
    active: Arc<Mutex<Option<ActiveRecording>>>,
}

impl Recorder {
    pub fn new(world: SharedWorld) -> Self {
        Self {
            world,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }

    pub fn active_name(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|active| active.name.clone())
    }

    pub fn waypoint_count(&self) -> usize {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|active| active.waypoints.len())
            .unwrap_or(0)
    }

    pub fn start(&self, name: &str) -> Result<()> {
        if !valid_name(name) {
            return Err(Error::InvalidRecordingName(name.to_string()));
        }
        let mut active = self.active.lock().unwrap();
        if let Some(current) = active.as_ref() {
            return Err(Error::InvalidPacket(format!(
                "already recording '{}'",
                current.name
            )));
        }
        let start_position = self.world.position();
        *active = Some(ActiveRecording {
            name: name.to_string(),
            start_position,
            started_at: Instant::now(),
            last_event_drain: Instant::now(),
            waypoints: Vec::new(),
        });
        info!(name, %start_position, "recording started");
        Ok(())
    }

    /// Stop recording and return the result; `discard` drops it instead.
    pub fn stop(&self, discard: bool) -> Option<Recording> {
        let mut active = self.active.lock().unwrap();
        let finished = active.take()?;
        let count = finished.waypoints.len();
        if discard {
            info!(name = finished.name, count, "recording discarded");
            return None;
        }
        info!(name = finished.name, count, "recording stopped");
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Some(Recording {
            name: finished.name,
            created_at,
            version: 1,
            start_position: finished.start_position,
            waypoints: finished.waypoints,
        })
    }

    /// The client packet observer. Registered on the relay while the
    /// recorder exists; does nothing unless a recording is active.
    pub fn observer(&self) -> impl FnMut(u8, &mut PacketReader) -> Result<()> + Send {
        let recorder = self.clone();
        move |opcode, reader| {
            recorder.on_client_packet(opcode, reader);
            Ok(())
        }
    }

    fn on_client_packet(&self, opcode: u8, reader: &mut PacketReader) {
        let mut active = self.active.lock().unwrap();
        let Some(active) = active.as_mut() else {
            return;
        };
        let t = elapsed_secs(active.started_at);
        let player_pos = self.world.position();

        if let Some(direction) = opcodes::walk_direction(opcode) {
            let destination = player_pos.step(direction);
            debug!(?direction, from = %player_pos, to = %destination, "rec walk");
            active.waypoints.push(Waypoint::Walk {
                direction: direction.into(),
                pos: destination,
                player_pos: Some(player_pos),
                t,
            });
            return;
        }

        match opcode {
            opcodes::client::USE_ITEM => {
                let Ok(pos) = reader.read_position() else { return };
                let Ok(item_id) = reader.read_u16() else { return };
                let Ok(stack_pos) = reader.read_u8() else { return };
                let index = reader.read_u8().unwrap_or(0);
                debug!(item_id, target = %pos, "rec use_item");
                active.waypoints.push(Waypoint::UseItem {
                    x: pos.x,
                    y: pos.y,
                    z: pos.z,
                    item_id,
                    stack_pos,
                    index,
                    label: auto_label(item_id),
                    pos: player_pos,
                    t,
                });
            }
            opcodes::client::USE_ITEM_EX => {
                let Ok(from_pos) = reader.read_position() else { return };
                let Ok(item_id) = reader.read_u16() else { return };
                let Ok(stack_pos) = reader.read_u8() else { return };
                let Ok(to_pos) = reader.read_position() else { return };
                let to_stack_pos = reader.read_u8().unwrap_or(0);
                debug!(item_id, from = %from_pos, to = %to_pos, "rec use_item_ex");
                active.waypoints.push(Waypoint::UseItemEx {
                    from_pos,
                    item_id,
                    stack_pos,
                    to_pos,
                    to_stack_pos,
                    pos: player_pos,
                    t,
                });
            }
            _ => {}
        }
    }

    /// Fold server events observed since the last drain into waypoints.
    /// Called on the recorder tick (~100 ms).
    pub fn drain_server_events(&self) {
        let mut active = self.active.lock().unwrap();
        let Some(active) = active.as_mut() else {
            return;
        };
        let since = active.last_event_drain;
        active.last_event_drain = Instant::now();

        let world = self.world.read();
        for event in world.server_events() {
            if event.at <= since {
                continue;
            }
            let t = elapsed_secs(active.started_at);
            match event.kind {
                EventKind::FloorChangeUp => active.waypoints.push(Waypoint::FloorChange {
                    direction: FloorDirection::Up,
                    pos: event.pos,
                    z: event.pos.z,
                    t,
                }),
                EventKind::FloorChangeDown => active.waypoints.push(Waypoint::FloorChange {
                    direction: FloorDirection::Down,
                    pos: event.pos,
                    z: event.pos.z,
                    t,
                }),
                EventKind::CancelWalk => active.waypoints.push(Waypoint::CancelWalk {
                    direction: 0,
                    pos: event.pos,
                    t,
                }),
            }
        }
    }
}

fn elapsed_secs(since: Instant) -> f64 {
    (since.elapsed().as_millis() as f64 / 100.0).round() / 10.0
}
