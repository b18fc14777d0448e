//! Optional external bridge: an in-process companion (memory reader)
//! pushes authoritative creature and player snapshots over a local
//! socket, one JSON object per line. Bridge-sourced creatures carry
//! accurate positions and are exempt from staleness pruning.

use std::path::PathBuf;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

use crate::codec::Position;
use crate::error::{Error, Result};
use crate::state::SharedWorld;

#[derive(Debug, Deserialize)]
struct BridgeCreature {
    id: u32,
    health: u8,
    x: u16,
    y: u16,
    z: u8,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct BridgePlayer {
    x: u16,
    y: u16,
    z: u8,
}

/// One snapshot message from the bridge.
#[derive(Debug, Deserialize)]
struct BridgeSnapshot {
    #[serde(default)]
    player: Option<BridgePlayer>,
    #[serde(default)]
    creatures: Vec<BridgeCreature>,
    /// Creature IDs that vanished since the last snapshot.
    #[serde(default)]
    removed: Vec<u32>,
}

/// Accept bridge connections and fold snapshots into the world model.
/// Single consumer: connections are served one at a time.
pub async fn run_bridge_listener(socket_path: PathBuf, world: SharedWorld) -> Result<()> {
    let _ = std::fs::remove_file(&socket_path);
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(&socket_path)
        .map_err(|e| Error::Setup(format!("cannot bind bridge socket: {e}")))?;
    info!(path = %socket_path.display(), "bridge listening");

    loop {
        let (stream, _) = listener.accept().await?;
        info!("bridge connected");
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let snapshot: BridgeSnapshot = match serde_json::from_str(&line) {
                        Ok(snapshot) => snapshot,
                        Err(e) => {
                            debug!(error = %e, "unparsable bridge line");
                            continue;
                        }
                    };
                    apply_snapshot(&world, snapshot);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "bridge read error");
                    break;
                }
            }
        }
        info!("bridge disconnected");
    }
}

fn apply_snapshot(world: &SharedWorld, snapshot: BridgeSnapshot) {
    let mut world = world.write();
    if let Some(player) = snapshot.player {
        world.set_position_from_bridge(Position::new(player.x, player.y, player.z));
    }
    for creature in snapshot.creatures {
        world.apply_bridge_creature(
            creature.id,
            creature.health,
            Position::new(creature.x, creature.y, creature.z),
            &creature.name,
        );
    }
    for id in snapshot.removed {
        world.remove_creature(id);
    }
}
