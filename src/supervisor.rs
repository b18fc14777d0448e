//! The composition root. Owns the world model, both relays, the task
//! host, the recorder, and playback; everything else receives explicit
//! handles instead of reaching for globals.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bot::{BotContext, TaskHost};
use crate::bridge;
use crate::cavebot::compiler::build_actions_map;
use crate::cavebot::playback::{PlaybackConfig, PlaybackEngine, PlaybackStatus, TargetingStrategy};
use crate::cavebot::recording::{Recorder, RecordingStore};
use crate::codec::{builders, Direction, Position};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::relay::{Relay, RelayConfig, RelayHandle};
use crate::protocol::session::SessionRole;
use crate::state::{scanner, SharedWorld};

/// Recorder event-drain cadence.
const RECORDER_TICK: Duration = Duration::from_millis(100);

struct ActivePlayback {
    handle: JoinHandle<()>,
    status: Arc<Mutex<PlaybackStatus>>,
}

pub struct Supervisor {
    config: Config,
    world: SharedWorld,
    game_handle: RelayHandle,
    login_handle: RelayHandle,
    bot: BotContext,
    host: Arc<TaskHost>,
    recorder: Recorder,
    store: RecordingStore,
    playback: Mutex<Option<ActivePlayback>>,
    login_relay: Mutex<Option<Relay>>,
    game_relay: Mutex<Option<Relay>>,
}

impl Supervisor {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let server_ip = config.server_ip()?;
        let world = SharedWorld::new();

        let login_relay = Relay::new(RelayConfig {
            role: SessionRole::Login,
            listen_addr: config.login_listen_addr(),
            server_host: config.server_host.clone(),
            server_port: config.login_port,
            server_ip,
        })?;
        let game_relay = Relay::new(RelayConfig {
            role: SessionRole::Game,
            listen_addr: config.game_listen_addr(),
            server_host: config.server_host.clone(),
            server_port: config.game_port,
            server_ip,
        })?;
        let login_handle = login_relay.handle();
        let game_handle = game_relay.handle();

        let bot = BotContext::from_relay(world.clone(), game_handle.clone());
        // Lay out the data directory on first run.
        std::fs::create_dir_all(config.tasks_dir())?;
        std::fs::create_dir_all(config.recordings_dir())?;
        let host = Arc::new(TaskHost::new(
            config.tasks_dir(),
            config.settings_path(),
            bot.clone(),
        ));
        host.discover();

        let recorder = Recorder::new(world.clone());
        let store = RecordingStore::new(config.recordings_dir());

        // Scanner: every decrypted server payload mutates the world.
        {
            let world = world.clone();
            game_handle.set_server_payload_hook(Box::new(move |payload| {
                let mut world = world.write();
                scanner::scan(payload, &mut world);
            }));
        }
        // Enabled tasks start once per session.
        {
            let host = host.clone();
            game_handle.set_on_login_success(Box::new(move || host.start_all_enabled()));
        }
        {
            let host = host.clone();
            let world = world.clone();
            game_handle.set_on_disconnected(Box::new(move || {
                host.on_session_closed();
                world.reset();
            }));
        }
        // The recorder watches client packets for the whole process
        // lifetime; it ignores them unless a recording is active.
        {
            let mut observer = recorder.observer();
            game_handle.register_client_observer(Box::new(move |opcode, reader| {
                observer(opcode, reader)
            }));
        }

        Ok(Arc::new(Self {
            config,
            world,
            game_handle,
            login_handle,
            bot,
            host,
            recorder,
            store,
            playback: Mutex::new(None),
            login_relay: Mutex::new(Some(login_relay)),
            game_relay: Mutex::new(Some(game_relay)),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn world(&self) -> &SharedWorld {
        &self.world
    }

    pub fn host(&self) -> &TaskHost {
        &self.host
    }

    pub fn bot(&self) -> &BotContext {
        &self.bot
    }

    /// Run both relays plus the background services. Returns only on a
    /// fatal setup failure (e.g. a port that cannot be bound).
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let login_relay = self
            .login_relay
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Setup("supervisor already running".into()))?;
        let game_relay = self
            .game_relay
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Setup("supervisor already running".into()))?;

        let recorder_tick = {
            let recorder = self.recorder.clone();
            tokio::spawn(async move {
                loop {
                    recorder.drain_server_events();
                    tokio::time::sleep(RECORDER_TICK).await;
                }
            })
        };
        let bridge_task = tokio::spawn(bridge::run_bridge_listener(
            self.config.bridge_socket_path(),
            self.world.clone(),
        ));

        info!(
            server = %self.config.server_host,
            login = self.config.login_port,
            game = self.config.game_port,
            "supervisor running"
        );
        let result = tokio::try_join!(login_relay.run(), game_relay.run());

        recorder_tick.abort();
        bridge_task.abort();
        self.stop_playback();
        self.host.on_session_closed();
        result.map(|_| ())
    }

    // ── Recording ──────────────────────────────────────────────────

    pub fn start_recording(&self, name: &str) -> Result<()> {
        // Fail early instead of at save time.
        self.store.validate_name(name)?;
        self.recorder.start(name)
    }

    pub fn stop_recording(&self, discard: bool) -> Result<Option<usize>> {
        match self.recorder.stop(discard) {
            Some(recording) => {
                let count = recording.waypoints.len();
                self.store.save(&recording)?;
                Ok(Some(count))
            }
            None => Ok(None),
        }
    }

    pub fn recordings(&self) -> &RecordingStore {
        &self.store
    }

    // ── Playback ───────────────────────────────────────────────────

    pub fn play_recording(&self, name: &str, looped: bool) -> Result<usize> {
        let recording = self.store.load(name)?;
        let nodes = build_actions_map(&recording);
        if nodes.is_empty() {
            return Err(Error::InvalidPacket(format!(
                "recording '{name}' compiles to an empty plan"
            )));
        }
        let node_count = nodes.len();

        let strategy = match self
            .host
            .settings_snapshot()
            .extra_str("cavebot", "targeting_strategy")
        {
            Some("pause_on_monster") => TargetingStrategy::PauseOnMonster,
            Some("lure") => TargetingStrategy::Lure,
            _ => TargetingStrategy::None,
        };
        let config = PlaybackConfig {
            loop_playback: looped,
            strategy,
            ..Default::default()
        };

        let engine = PlaybackEngine::new(self.bot.clone(), name, nodes, config);
        let status = engine.status_handle();
        let mut playback = self.playback.lock().unwrap();
        if let Some(active) = playback.take() {
            warn!("playback already active, replacing");
            active.handle.abort();
        }
        *playback = Some(ActivePlayback {
            handle: tokio::spawn(engine.run()),
            status,
        });
        Ok(node_count)
    }

    pub fn stop_playback(&self) -> bool {
        let mut playback = self.playback.lock().unwrap();
        match playback.take() {
            Some(active) => {
                active.handle.abort();
                if let Ok(mut status) = active.status.lock() {
                    status.active = false;
                }
                info!("playback stopped");
                true
            }
            None => false,
        }
    }

    pub fn playback_status(&self) -> Option<PlaybackStatus> {
        let playback = self.playback.lock().unwrap();
        playback
            .as_ref()
            .map(|active| active.status.lock().unwrap().clone())
    }

    // ── Direct control (CLI surface) ───────────────────────────────

    pub async fn walk(&self, direction: Direction, steps: u32) -> Result<()> {
        for _ in 0..steps.max(1) {
            self.bot.walk(direction)?;
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        Ok(())
    }

    pub fn move_item(
        &self,
        from: Position,
        item_id: u16,
        stack_pos: u8,
        to: Position,
        count: u8,
    ) -> Result<()> {
        self.bot
            .inject(builders::move_thing(from, item_id, stack_pos, to, count))
    }

    pub fn look_at(&self, pos: Position, item_id: u16, stack_pos: u8) -> Result<()> {
        self.bot.inject(builders::look_at(pos, item_id, stack_pos))
    }

    pub fn set_fight_modes(&self, fight: u8, chase: u8, safe: u8) -> Result<()> {
        self.bot.inject(builders::set_fight_modes(fight, chase, safe))
    }

    pub fn logout(&self) -> Result<()> {
        self.bot.inject(builders::logout())
    }

    pub fn ping(&self) -> Result<()> {
        self.bot.inject(builders::ping())
    }

    // ── Status ─────────────────────────────────────────────────────

    /// The stable dashboard schema.
    pub fn status_json(&self) -> serde_json::Value {
        let world = self.world.read();
        let creatures: Vec<serde_json::Value> = world
            .creatures()
            .iter()
            .map(|(id, info)| {
                json!({
                    "id": id,
                    "name": info.name,
                    "health": info.health,
                    "x": info.x,
                    "y": info.y,
                    "z": info.z,
                    "source": match info.source {
                        crate::state::CreatureSource::Proxy => "proxy",
                        crate::state::CreatureSource::Bridge => "bridge",
                    },
                })
            })
            .collect();

        let cavebot = match self.playback_status() {
            Some(status) => json!({
                "active": status.active,
                "recording": status.recording,
                "index": status.index,
                "total": status.total,
                "looping": status.looping,
                "failed": status.failed,
                "recording_active": self.recorder.is_active(),
                "recording_name": self.recorder.active_name(),
                "recorded_waypoints": self.recorder.waypoint_count(),
            }),
            None => json!({
                "active": false,
                "recording_active": self.recorder.is_active(),
                "recording_name": self.recorder.active_name(),
                "recorded_waypoints": self.recorder.waypoint_count(),
            }),
        };

        json!({
            "connected": self.game_handle.logged_in(),
            "player": {
                "id": world.player_id,
                "position": [world.position.x, world.position.y, world.position.z],
                "hp": world.hp,
                "max_hp": world.max_hp,
                "mana": world.mana,
                "max_mana": world.max_mana,
                "level": world.level,
                "magic_level": world.magic_level,
                "soul": world.soul,
                "capacity": world.capacity,
                "experience": world.experience,
                "speed": world.speed,
                "icons": world.player_icons,
            },
            "creatures": creatures,
            "packets_from_client": self.login_handle.packets_from_client()
                + self.game_handle.packets_from_client(),
            "packets_from_server": self.login_handle.packets_from_server()
                + self.game_handle.packets_from_server(),
            "actions": self.host.list(),
            "cavebot": cavebot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_supervisor() -> Arc<Supervisor> {
        let dir = std::env::temp_dir().join(format!(
            "otbot-supervisor-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let mut config = Config::new("87.98.220.215", dir);
        // Ephemeral ports so parallel tests never collide.
        config.login_port = 0;
        config.game_port = 0;
        Supervisor::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_status_json_schema() {
        let supervisor = test_supervisor();
        {
            let mut world = supervisor.world().write();
            world.hp = 1000;
            world.max_hp = 2000;
            world.set_position(Position::new(120, 500, 7));
        }
        let status = supervisor.status_json();
        assert_eq!(status["connected"], false);
        assert_eq!(status["player"]["hp"], 1000);
        assert_eq!(status["player"]["position"][0], 120);
        assert!(status["creatures"].is_array());
        assert!(status["actions"].is_array());
        assert_eq!(status["cavebot"]["active"], false);
        assert_eq!(status["packets_from_client"], 0);
    }

    #[tokio::test]
    async fn test_play_missing_recording_errors() {
        let supervisor = test_supervisor();
        assert!(supervisor.play_recording("nope", false).is_err());
        assert!(!supervisor.stop_playback());
    }

    #[tokio::test]
    async fn test_record_then_play_lifecycle() {
        let supervisor = test_supervisor();
        supervisor.world().write().set_position(Position::new(100, 200, 7));
        supervisor.start_recording("loop1").unwrap();
        assert!(supervisor.start_recording("other").is_err());

        // Nothing recorded: saved with zero waypoints.
        let count = supervisor.stop_recording(false).unwrap();
        assert_eq!(count, Some(0));
        assert_eq!(supervisor.recordings().list().len(), 1);

        // Empty plans refuse to play.
        assert!(supervisor.play_recording("loop1", false).is_err());
        assert!(supervisor.recordings().delete("loop1").unwrap());
    }
}
