//! Actions-map playback: executes one node at a time against the live
//! world model, with per-node retry budgets, cancel-walk escape, floor
//! skipping, and pluggable targeting strategies.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bot::BotContext;
use crate::cavebot::compiler::{ActionNode, DEFAULT_GROUND_ITEM};
use crate::cavebot::recording::WalkKind;
use crate::codec::{builders, Direction, Position};
use crate::state::world::MONSTER_ID_MIN;

/// Close enough for a non-exact walk_to (Manhattan tiles).
const WALK_TOLERANCE: u32 = 2;
const MAX_RETRIES: usize = 5;
const USE_ITEM_TIMEOUT: Duration = Duration::from_secs(5);
/// World model poll cadence inside wait loops.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Second click on a floor-change item if z has not moved by then.
const SECOND_CLICK_AFTER: Duration = Duration::from_millis(500);
/// Reachability probe: one pathfind click, fast bail.
const REACHABLE_PROBE_TIMEOUT: Duration = Duration::from_millis(400);
/// Safety cap on strategy pauses and combat waits.
const PAUSE_MAX_TIMEOUT: Duration = Duration::from_secs(60);
/// Directional walk cadence for walk_steps (2.5 Hz).
const STEP_INTERVAL: Duration = Duration::from_millis(400);
/// Top-off range for exact walk_to nodes.
const DIRECTIONAL_TOPOFF_STEPS: usize = 6;
/// Monster HP frozen this long during a pause means PZ or unreachable.
const HP_STALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetingStrategy {
    None,
    PauseOnMonster,
    Lure,
}

impl Default for TargetingStrategy {
    fn default() -> Self {
        TargetingStrategy::None
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub loop_playback: bool,
    pub strategy: TargetingStrategy,
    /// Lure: stop walking once this many monsters are nearby.
    pub lure_count: usize,
    /// Lure: "nearby" radius in tiles.
    pub lure_distance: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            loop_playback: false,
            strategy: TargetingStrategy::None,
            lure_count: 3,
            lure_distance: 5,
        }
    }
}

/// Progress snapshot shared with the daemon/status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaybackStatus {
    pub active: bool,
    pub recording: String,
    pub index: usize,
    pub total: usize,
    pub looping: bool,
    pub failed: BTreeSet<usize>,
}

enum WaitOutcome {
    Arrived,
    FloorChanged(Position),
    CancelWalk,
    Timeout,
}

pub struct PlaybackEngine {
    bot: BotContext,
    nodes: Vec<ActionNode>,
    config: PlaybackConfig,
    status: Arc<Mutex<PlaybackStatus>>,
}

impl PlaybackEngine {
    pub fn new(
        bot: BotContext,
        recording_name: &str,
        nodes: Vec<ActionNode>,
        config: PlaybackConfig,
    ) -> Self {
        let status = Arc::new(Mutex::new(PlaybackStatus {
            active: false,
            recording: recording_name.to_string(),
            index: 0,
            total: nodes.len(),
            looping: config.loop_playback,
            failed: BTreeSet::new(),
        }));
        Self {
            bot,
            nodes,
            config,
            status,
        }
    }

    pub fn status_handle(&self) -> Arc<Mutex<PlaybackStatus>> {
        self.status.clone()
    }

    /// Run to completion (or forever with `loop_playback`). Cancellation
    /// comes from aborting the owning task; every wait in here is an
    /// await point.
    pub async fn run(self) {
        {
            let mut status = self.status.lock().unwrap();
            status.active = true;
            status.failed.clear();
        }
        if self.config.strategy == TargetingStrategy::Lure {
            self.bot.world().write().lure_active = true;
        }
        info!(
            nodes = self.nodes.len(),
            strategy = ?self.config.strategy,
            "playback started"
        );

        loop {
            let mut index = 0usize;
            while index < self.nodes.len() {
                if !self.bot.is_connected() {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }

                // Floor skip: if the player is not on this node's floor,
                // resume at the first node that is.
                let player_z = self.bot.position().z;
                if self.nodes[index].target().z != player_z {
                    if let Some(matching) = (index..self.nodes.len())
                        .find(|&j| self.nodes[j].target().z == player_z)
                    {
                        if matching != index {
                            info!(from = index, to = matching, "floor skip");
                            index = matching;
                        }
                    }
                }

                self.status.lock().unwrap().index = index;
                self.apply_strategy(&self.nodes[index]).await;

                let label = format!("[{}/{}]", index + 1, self.nodes.len());
                let success = self.execute_node(&self.nodes[index], &label).await;
                if !success {
                    warn!(node = index, "node failed, continuing");
                    self.status.lock().unwrap().failed.insert(index);
                }
                index += 1;
            }

            if !self.config.loop_playback {
                break;
            }
            info!("looping playback");
        }

        if self.config.strategy == TargetingStrategy::Lure {
            self.bot.world().write().lure_active = false;
        }
        self.status.lock().unwrap().active = false;
        info!("playback finished");
    }

    async fn execute_node(&self, node: &ActionNode, label: &str) -> bool {
        match node {
            ActionNode::WalkTo {
                target,
                item_id,
                stack_pos,
                exact,
            } => {
                self.execute_walk_to(*target, *item_id, *stack_pos, *exact, label)
                    .await
            }
            ActionNode::UseItem {
                target,
                item_id,
                stack_pos,
                index,
                label: item_label,
                player_pos,
            } => {
                self.execute_use_item(
                    *target,
                    *item_id,
                    *stack_pos,
                    *index,
                    *player_pos,
                    item_label,
                    label,
                )
                .await
            }
            ActionNode::UseItemEx {
                target,
                from_pos,
                item_id,
                stack_pos,
                to_pos,
                to_stack_pos,
                ..
            } => {
                self.execute_use_item_ex(
                    *target,
                    *from_pos,
                    *item_id,
                    *stack_pos,
                    *to_pos,
                    *to_stack_pos,
                    label,
                )
                .await
            }
            ActionNode::WalkSteps {
                target,
                start,
                steps,
                ..
            } => self.execute_walk_steps(*target, *start, steps, label).await,
        }
    }

    /// Pathfind walk: click the ground at the target so the server walks
    /// us there; exact nodes get a directional top-off for the last
    /// tiles.
    async fn execute_walk_to(
        &self,
        target: Position,
        item_id: u16,
        stack_pos: u8,
        exact: bool,
        label: &str,
    ) -> bool {
        let start_z = self.bot.position().z;
        let mut cancel_count = 0usize;
        let mut last_cancel_pos: Option<Position> = None;
        let mut attempt = 0usize;

        debug!(%target, exact, "{label} walk_to");

        while attempt < MAX_RETRIES {
            let current = self.bot.position();
            let tolerance = if exact { 0 } else { WALK_TOLERANCE };
            if current.manhattan(&target) <= tolerance && current.z == target.z {
                return true;
            }
            // Stairs may have auto-triggered under us.
            if exact && current.z != start_z {
                return true;
            }

            let _ = self
                .bot
                .inject(builders::use_item(target, item_id, stack_pos, 0));

            let dist = current.manhattan(&target);
            let timeout =
                Duration::from_secs_f64((dist as f64 * 0.3 + 2.0).max(3.0));
            let wait_tolerance = if exact { 1 } else { WALK_TOLERANCE };
            match self
                .wait_for_position(target, timeout, wait_tolerance, exact)
                .await
            {
                WaitOutcome::FloorChanged(pos) => {
                    debug!(%pos, "{label} floor changed");
                    return true;
                }
                WaitOutcome::CancelWalk => {
                    let pos = self.bot.position();
                    cancel_count = if last_cancel_pos == Some(pos) {
                        cancel_count + 1
                    } else {
                        1
                    };
                    last_cancel_pos = Some(pos);
                    debug!(%pos, cancel_count, "{label} cancel_walk");

                    if cancel_count >= 2 {
                        if self.directional_escape(pos).await {
                            cancel_count = 0;
                            last_cancel_pos = None;
                        } else if self.config.strategy == TargetingStrategy::Lure
                            && self.combat_nearby()
                        {
                            // Let targeting clear the blockers, then retry.
                            self.suspend_lure_for_combat().await;
                            cancel_count = 0;
                            last_cancel_pos = None;
                        } else {
                            warn!(%pos, "{label} stuck, escape failed");
                            return false;
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    attempt += 1;
                    continue;
                }
                WaitOutcome::Arrived => {
                    cancel_count = 0;
                    last_cancel_pos = None;
                    let after = self.bot.position();
                    if !exact {
                        return true;
                    }
                    if after == target {
                        return true;
                    }
                }
                WaitOutcome::Timeout => {
                    cancel_count = 0;
                    last_cancel_pos = None;
                }
            }

            if exact {
                let after = self.bot.position();
                if after.z != start_z {
                    return true;
                }
                if after.z == target.z && after.manhattan(&target) <= 5 {
                    if self.walk_to_exact(target, DIRECTIONAL_TOPOFF_STEPS).await {
                        return true;
                    }
                    if self.bot.position().z != start_z {
                        return true;
                    }
                }
            }

            attempt += 1;
        }

        let current = self.bot.position();
        let tolerance = if exact { 0 } else { WALK_TOLERANCE };
        // Close enough to keep going.
        current.manhattan(&target) <= tolerance + 2 && current.z == target.z
    }

    /// Exact interaction (stairs / doors / ladders). Pre-walks to the
    /// recorded player position when out of reach, then verifies the
    /// click by floor change, tile transform, or movement.
    #[allow(clippy::too_many_arguments)]
    async fn execute_use_item(
        &self,
        target: Position,
        item_id: u16,
        stack_pos: u8,
        index: u8,
        player_pos: Position,
        item_label: &str,
        label: &str,
    ) -> bool {
        debug!(%target, item_label, "{label} use_item");

        let current = self.bot.position();
        if current.chebyshev(&target) > 1 || current.z != target.z {
            let ok = self
                .execute_walk_to(player_pos, DEFAULT_GROUND_ITEM, 1, true, label)
                .await;
            if !ok {
                warn!(%player_pos, "{label} pre-walk failed");
                return false;
            }
        }

        let packet = builders::use_item(target, item_id, stack_pos, index);
        let current = self.bot.position();
        if target.z != current.z {
            self.use_item_floor_change(packet, label).await
        } else {
            self.use_item_same_floor(packet, target, label).await
        }
    }

    async fn use_item_floor_change(&self, packet: Vec<u8>, label: &str) -> bool {
        for _attempt in 0..MAX_RETRIES {
            let before = self.bot.position();
            let before_time = Instant::now();
            let _ = self.bot.inject(packet.clone());
            let mut second_click_sent = false;

            while before_time.elapsed() < USE_ITEM_TIMEOUT {
                let (pos, floor_event) = {
                    let world = self.bot.world().read();
                    (world.position, world.floor_change_since(before_time))
                };
                if let Some(event) = floor_event {
                    debug!(pos = %event.pos, "{label} floor change event");
                    return true;
                }
                if pos.z != before.z {
                    debug!(%pos, "{label} floor changed");
                    return true;
                }
                if !second_click_sent && before_time.elapsed() >= SECOND_CLICK_AFTER {
                    let _ = self.bot.inject(packet.clone());
                    second_click_sent = true;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
        warn!("{label} still on the same floor");
        false
    }

    async fn use_item_same_floor(&self, packet: Vec<u8>, target: Position, label: &str) -> bool {
        for _attempt in 0..MAX_RETRIES {
            let before = self.bot.position();
            let before_time = Instant::now();
            let _ = self.bot.inject(packet.clone());

            while before_time.elapsed() < USE_ITEM_TIMEOUT {
                let (pos, floor_event, tile_changed) = {
                    let world = self.bot.world().read();
                    (
                        world.position,
                        world.floor_change_since(before_time),
                        world.tile_updated_since(target, before_time),
                    )
                };
                // A same-z ladder can still change floors.
                if floor_event.is_some() || pos.z != before.z {
                    return true;
                }
                // Door opened.
                if tile_changed {
                    debug!(%target, "{label} tile transformed");
                    return true;
                }
                // Walked through.
                if pos != before {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        warn!(%target, "{label} no observable effect");
        false
    }

    /// Rope/shovel style use: one send, success is landing near the
    /// target within the timeout.
    #[allow(clippy::too_many_arguments)]
    async fn execute_use_item_ex(
        &self,
        target: Position,
        from_pos: Position,
        item_id: u16,
        stack_pos: u8,
        to_pos: Position,
        to_stack_pos: u8,
        label: &str,
    ) -> bool {
        debug!(%target, item_id, "{label} use_item_ex");
        let _ = self.bot.inject(builders::use_item_ex(
            from_pos,
            item_id,
            stack_pos,
            to_pos,
            to_stack_pos,
        ));
        matches!(
            self.wait_for_position(target, USE_ITEM_TIMEOUT, 1, false)
                .await,
            WaitOutcome::Arrived
        )
    }

    /// Raw directional steps for recorded floor transitions.
    async fn execute_walk_steps(
        &self,
        target: Position,
        start: Position,
        steps: &[WalkKind],
        label: &str,
    ) -> bool {
        debug!(%target, steps = steps.len(), "{label} walk_steps");

        let current = self.bot.position();
        if current != start {
            let ok = self.walk_to_exact(start, 8).await;
            if !ok {
                warn!(%start, "{label} could not reach step start");
                return false;
            }
        }

        for step in steps {
            let Some(direction) = walk_kind_direction(*step) else {
                continue;
            };
            let _ = self.bot.walk(direction);
            tokio::time::sleep(STEP_INTERVAL).await;
        }

        match self
            .wait_for_position(target, USE_ITEM_TIMEOUT, WALK_TOLERANCE, false)
            .await
        {
            WaitOutcome::Arrived => true,
            // For floor transitions, reaching the right floor is enough.
            _ => self.bot.position().z == target.z,
        }
    }

    /// Poll the world until we are within `tolerance` of `target` on the
    /// right floor. Floor changes are event-driven: the server event ring
    /// is consulted so a change is seen the instant it is recorded, not
    /// only when the polled z happens to differ.
    async fn wait_for_position(
        &self,
        target: Position,
        timeout: Duration,
        tolerance: u32,
        abort_on_floor_change: bool,
    ) -> WaitOutcome {
        let started = Instant::now();
        let start_z = self.bot.position().z;
        loop {
            let (pos, floor_event, cancelled) = {
                let world = self.bot.world().read();
                (
                    world.position,
                    world.floor_change_since(started),
                    world.cancel_walk_since(started),
                )
            };
            if pos.manhattan(&target) <= tolerance && pos.z == target.z {
                return WaitOutcome::Arrived;
            }
            if abort_on_floor_change {
                if let Some(event) = floor_event {
                    return WaitOutcome::FloorChanged(event.pos);
                }
                if pos.z != start_z {
                    return WaitOutcome::FloorChanged(pos);
                }
            }
            if cancelled {
                return WaitOutcome::CancelWalk;
            }
            if started.elapsed() >= timeout {
                return WaitOutcome::Timeout;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Try one step in each cardinal direction; true once the player
    /// moves off `stuck_at`.
    async fn directional_escape(&self, stuck_at: Position) -> bool {
        for direction in Direction::CARDINAL {
            let _ = self.bot.walk(direction);
            tokio::time::sleep(Duration::from_millis(300)).await;
            let now = self.bot.position();
            if now != stuck_at {
                debug!(?direction, %now, "escaped");
                return true;
            }
        }
        false
    }

    /// Directional walk onto an exact tile, used to top off pathfind
    /// walks and to line up walk_steps starts. Bails out on floor change
    /// so the caller can notice.
    async fn walk_to_exact(&self, target: Position, max_steps: usize) -> bool {
        let start_z = self.bot.position().z;
        for _ in 0..max_steps {
            let current = self.bot.position();
            if current.z != start_z {
                return false;
            }
            if current == target {
                return true;
            }
            let Some(direction) = Direction::toward(current, target) else {
                // Same x/y, wrong floor.
                return false;
            };
            let _ = self.bot.walk(direction);
            tokio::time::sleep(Duration::from_millis(350)).await;
        }
        self.bot.position() == target
    }

    // ── Targeting strategies ───────────────────────────────────────

    async fn apply_strategy(&self, node: &ActionNode) {
        match self.config.strategy {
            TargetingStrategy::None => {}
            TargetingStrategy::PauseOnMonster => self.pause_on_monster().await,
            TargetingStrategy::Lure => self.apply_lure(node).await,
        }
    }

    /// Pause the current node while auto-targeting fights a reachable
    /// monster. Unreachable targets (and PZ stand-offs, detected by HP
    /// not moving) do not hold playback up.
    async fn pause_on_monster(&self) {
        let Some((target_id, creature_pos, hp)) = ({
            let world = self.bot.world().read();
            let id = world.attack_target_id;
            if id < MONSTER_ID_MIN {
                None
            } else {
                world
                    .creature(id)
                    .filter(|c| c.health > 0 && c.health <= 100)
                    .map(|c| (id, c.position(), c.health))
            }
        }) else {
            return;
        };

        if !self.is_reachable(creature_pos).await {
            debug!(id = format!("0x{target_id:08X}"), "target unreachable, not pausing");
            return;
        }

        info!(id = format!("0x{target_id:08X}"), hp, "pausing for combat");
        let pause_start = Instant::now();
        let mut last_hp = hp;
        let mut last_hp_change = Instant::now();
        let mut last_checked = target_id;

        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if pause_start.elapsed() > PAUSE_MAX_TIMEOUT {
                info!("resuming: pause timeout");
                return;
            }

            let snapshot = {
                let world = self.bot.world().read();
                let id = world.attack_target_id;
                world.creature(id).map(|c| (id, c.position(), c.health))
            };
            let Some((id, pos, hp_now)) = snapshot else {
                return; // target gone
            };
            if hp_now == 0 {
                return; // target dead
            }

            if hp_now != last_hp {
                last_hp = hp_now;
                last_hp_change = Instant::now();
            } else if last_hp_change.elapsed() > HP_STALL_TIMEOUT {
                info!("resuming: target HP frozen (PZ or unreachable)");
                return;
            }

            // Targeting switched monsters mid-pause: re-check reach.
            if id != last_checked {
                if !self.is_reachable(pos).await {
                    info!("resuming: new target unreachable");
                    return;
                }
                last_checked = id;
                last_hp = hp_now;
                last_hp_change = Instant::now();
            }
        }
    }

    /// Lure: keep walking until enough monsters trail us (or a floor
    /// change is imminent with any monster nearby), then hand control to
    /// targeting by clearing the lure flag until combat clears.
    async fn apply_lure(&self, node: &ActionNode) {
        let lure_active = self.bot.world().read().lure_active;
        if !lure_active {
            // Combat is in progress from a previous trigger; wait it out
            // and re-arm.
            self.wait_for_combat_clear().await;
            self.bot.world().write().lure_active = true;
            return;
        }

        let player = self.bot.position();
        let nearby = self
            .bot
            .world()
            .read()
            .nearby_monsters(self.config.lure_distance)
            .len();
        let floor_change_next = node.target().z != player.z;

        if nearby >= self.config.lure_count || (floor_change_next && nearby >= 1) {
            info!(nearby, "lure threshold met, engaging");
            self.bot.world().write().lure_active = false;
            self.wait_for_combat_clear().await;
            self.bot.world().write().lure_active = true;
        }
    }

    fn combat_nearby(&self) -> bool {
        let world = self.bot.world().read();
        world.attack_target_id >= MONSTER_ID_MIN
            || !world.nearby_monsters(self.config.lure_distance).is_empty()
    }

    async fn suspend_lure_for_combat(&self) {
        info!("stuck with monsters nearby: releasing lure for combat");
        self.bot.world().write().lure_active = false;
        self.wait_for_combat_clear().await;
        self.bot.world().write().lure_active = true;
    }

    async fn wait_for_combat_clear(&self) {
        let started = Instant::now();
        while started.elapsed() < PAUSE_MAX_TIMEOUT {
            let clear = {
                let world = self.bot.world().read();
                world.attack_target_id == 0
                    && world.nearby_monsters(self.config.lure_distance).is_empty()
            };
            if clear {
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Probe server-side reachability: click the ground under the
    /// monster and see whether the character starts walking.
    async fn is_reachable(&self, target: Position) -> bool {
        let player = self.bot.position();
        if player.z != target.z {
            return false;
        }
        if player.chebyshev(&target) <= 1 {
            return true;
        }
        let _ = self
            .bot
            .inject(builders::use_item(target, DEFAULT_GROUND_ITEM, 1, 0));
        let started = Instant::now();
        while started.elapsed() < REACHABLE_PROBE_TIMEOUT {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if self.bot.position() != player {
                return true;
            }
        }
        false
    }
}

fn walk_kind_direction(kind: WalkKind) -> Option<Direction> {
    match kind {
        WalkKind::North => Some(Direction::North),
        WalkKind::East => Some(Direction::East),
        WalkKind::South => Some(Direction::South),
        WalkKind::West => Some(Direction::West),
        WalkKind::NorthEast => Some(Direction::NorthEast),
        WalkKind::SouthEast => Some(Direction::SouthEast),
        WalkKind::SouthWest => Some(Direction::SouthWest),
        WalkKind::NorthWest => Some(Direction::NorthWest),
        WalkKind::Autowalk => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::context::{BotContext, ConnectedProbe, Injector};
    use crate::state::events::EventKind;
    use crate::state::SharedWorld;

    type Sent = Arc<Mutex<Vec<Vec<u8>>>>;

    fn test_context(world: SharedWorld) -> (BotContext, Sent) {
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let injector: Injector = Arc::new(move |payload| {
            sink.lock().unwrap().push(payload);
            Ok(())
        });
        let connected: ConnectedProbe = Arc::new(|| true);
        (BotContext::new(world, injector, connected), sent)
    }

    fn walk_to(x: u16, y: u16, z: u8, exact: bool) -> ActionNode {
        ActionNode::WalkTo {
            target: Position::new(x, y, z),
            item_id: DEFAULT_GROUND_ITEM,
            stack_pos: 1,
            exact,
        }
    }

    /// S5: position drifts to the target during the first attempt; the
    /// node succeeds with a single pathfind click and no retries.
    #[tokio::test]
    async fn test_walk_to_arrives_first_attempt() {
        let world = SharedWorld::new();
        world.write().set_position(Position::new(95, 200, 7));
        let (bot, sent) = test_context(world.clone());

        let engine = PlaybackEngine::new(
            bot,
            "s5",
            vec![walk_to(100, 200, 7, false)],
            PlaybackConfig::default(),
        );
        let status = engine.status_handle();

        let mover = {
            let world = world.clone();
            tokio::spawn(async move {
                for x in [97u16, 100] {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    world.write().set_position(Position::new(x, 200, 7));
                }
            })
        };

        engine.run().await;
        mover.await.unwrap();

        let status = status.lock().unwrap();
        assert!(status.failed.is_empty());
        // Exactly one ground click was needed.
        let clicks: Vec<_> = sent
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p[0] == 0x82)
            .cloned()
            .collect();
        assert_eq!(clicks.len(), 1);
    }

    /// S6: repeated cancel-walk at the same tile triggers a directional
    /// escape (N/E/S/W in order); when nothing moves, the node is
    /// recorded as failed and playback continues.
    #[tokio::test]
    async fn test_cancel_walk_escape_then_failure() {
        let world = SharedWorld::new();
        world.write().set_position(Position::new(150, 150, 7));
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));

        // Every pathfind click is answered by a cancel-walk shortly
        // after the engine starts waiting.
        let sink_world = world.clone();
        let cancelling: Injector = {
            let sent = sent.clone();
            Arc::new(move |payload: Vec<u8>| {
                sent.lock().unwrap().push(payload.clone());
                if payload[0] == 0x82 {
                    let world = sink_world.clone();
                    std::thread::spawn(move || {
                        std::thread::sleep(Duration::from_millis(150));
                        let mut w = world.write();
                        w.cancel_walk_time = Some(Instant::now());
                        let pos = w.position;
                        w.push_event(EventKind::CancelWalk, pos);
                    });
                }
                Ok(())
            })
        };
        let bot = BotContext::new(world.clone(), cancelling, Arc::new(|| true));

        let engine = PlaybackEngine::new(
            bot,
            "s6",
            vec![walk_to(160, 150, 7, false)],
            PlaybackConfig::default(),
        );
        let status = engine.status_handle();
        engine.run().await;

        let status = status.lock().unwrap();
        assert!(status.failed.contains(&0), "node must be recorded failed");

        // The escape sequence is the four cardinal walks in order.
        let sent = sent.lock().unwrap();
        let walks: Vec<u8> = sent
            .iter()
            .filter(|p| p.len() == 1)
            .map(|p| p[0])
            .collect();
        assert_eq!(walks, vec![0x65, 0x66, 0x67, 0x68]);
    }

    #[tokio::test]
    async fn test_walk_to_already_there_sends_nothing() {
        let world = SharedWorld::new();
        world.write().set_position(Position::new(100, 200, 7));
        let (bot, sent) = test_context(world.clone());

        let engine = PlaybackEngine::new(
            bot,
            "noop",
            vec![walk_to(101, 200, 7, false)],
            PlaybackConfig::default(),
        );
        engine.run().await;
        assert!(sent.lock().unwrap().is_empty());
    }

    /// Floor skip: with the player on z=6, a leading z=7 node is skipped
    /// and playback resumes at the first z=6 node.
    #[tokio::test]
    async fn test_floor_skip() {
        let world = SharedWorld::new();
        world.write().set_position(Position::new(100, 200, 6));
        let (bot, sent) = test_context(world.clone());

        let engine = PlaybackEngine::new(
            bot,
            "skip",
            vec![walk_to(300, 300, 7, false), walk_to(100, 200, 6, false)],
            PlaybackConfig::default(),
        );
        let status = engine.status_handle();
        engine.run().await;

        let status = status.lock().unwrap();
        assert!(status.failed.is_empty());
        assert_eq!(status.index, 1);
        assert!(sent.lock().unwrap().is_empty());
    }

    /// Floor-change use_item: click, then success the moment z moves.
    #[tokio::test]
    async fn test_use_item_floor_change() {
        let world = SharedWorld::new();
        world.write().set_position(Position::new(100, 200, 7));
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));

        let sink = sent.clone();
        let moving_world = world.clone();
        let injector: Injector = Arc::new(move |payload: Vec<u8>| {
            sink.lock().unwrap().push(payload.clone());
            if payload[0] == 0x82 {
                let world = moving_world.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(150));
                    let mut w = world.write();
                    w.set_position(Position::new(100, 199, 6));
                    let pos = w.position;
                    w.push_event(EventKind::FloorChangeUp, pos);
                });
            }
            Ok(())
        });
        let bot = BotContext::new(world.clone(), injector, Arc::new(|| true));

        // Stairs one tile north, on z=6 as the client renders them.
        let node = ActionNode::UseItem {
            target: Position::new(100, 199, 6),
            item_id: 1968,
            stack_pos: 0,
            index: 0,
            label: "Use item 1968".into(),
            player_pos: Position::new(100, 200, 7),
        };
        let engine = PlaybackEngine::new(bot, "stairs", vec![node], PlaybackConfig::default());
        let status = engine.status_handle();
        engine.run().await;

        assert!(status.lock().unwrap().failed.is_empty());
        let sent = sent.lock().unwrap();
        // One click sufficed; no second click after 0.5 s.
        let clicks = sent.iter().filter(|p| p[0] == 0x82).count();
        assert_eq!(clicks, 1);
    }

    /// use_item_ex: success requires landing within one tile of the
    /// target inside the timeout.
    #[tokio::test]
    async fn test_use_item_ex_arrival() {
        let world = SharedWorld::new();
        world.write().set_position(Position::new(100, 200, 7));
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));

        let sink = sent.clone();
        let moving_world = world.clone();
        let injector: Injector = Arc::new(move |payload: Vec<u8>| {
            sink.lock().unwrap().push(payload.clone());
            if payload[0] == 0x83 {
                let world = moving_world.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(200));
                    world.write().set_position(Position::new(100, 200, 8));
                });
            }
            Ok(())
        });
        let bot = BotContext::new(world.clone(), injector, Arc::new(|| true));

        let node = ActionNode::UseItemEx {
            target: Position::new(100, 200, 8),
            from_pos: Position::new(0xFFFF, 0, 0),
            item_id: 2120,
            stack_pos: 0,
            to_pos: Position::new(100, 201, 7),
            to_stack_pos: 0,
            label: "Use item 2120".into(),
            player_pos: Position::new(100, 200, 7),
        };
        let engine = PlaybackEngine::new(bot, "rope", vec![node], PlaybackConfig::default());
        let status = engine.status_handle();
        engine.run().await;
        assert!(status.lock().unwrap().failed.is_empty());
    }

    /// walk_steps: directional packets go out per step; reaching the
    /// target floor counts as success.
    #[tokio::test]
    async fn test_walk_steps() {
        let world = SharedWorld::new();
        world.write().set_position(Position::new(112, 566, 7));
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));

        let sink = sent.clone();
        let moving_world = world.clone();
        let injector: Injector = Arc::new(move |payload: Vec<u8>| {
            sink.lock().unwrap().push(payload.clone());
            if payload.len() == 1 && payload[0] == 0x67 {
                // Each south step moves the player; the second crosses
                // the stair down to z=6.
                let world = moving_world.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(100));
                    let mut w = world.write();
                    let p = w.position;
                    let new_z = if p.y + 1 >= 568 { 6 } else { p.z };
                    w.set_position(Position::new(p.x, p.y + 1, new_z));
                });
            }
            Ok(())
        });
        let bot = BotContext::new(world.clone(), injector, Arc::new(|| true));

        let node = ActionNode::WalkSteps {
            target: Position::new(112, 568, 6),
            start: Position::new(112, 566, 7),
            steps: vec![WalkKind::South, WalkKind::South],
            label: "Walk floor 7→6".into(),
        };
        let engine = PlaybackEngine::new(bot, "steps", vec![node], PlaybackConfig::default());
        let status = engine.status_handle();
        engine.run().await;

        assert!(status.lock().unwrap().failed.is_empty());
        let south_steps = sent
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.len() == 1 && p[0] == 0x67)
            .count();
        assert_eq!(south_steps, 2);
    }

    /// wait_for_position reports a floor change from the event ring even
    /// if polling alone would have caught it later.
    #[tokio::test]
    async fn test_wait_for_position_event_driven_floor_change() {
        let world = SharedWorld::new();
        world.write().set_position(Position::new(128, 564, 6));
        let (bot, _) = test_context(world.clone());
        let engine = PlaybackEngine::new(bot, "wfp", vec![], PlaybackConfig::default());

        let pusher = {
            let world = world.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                let mut w = world.write();
                w.set_position(Position::new(127, 564, 7));
                w.push_event(EventKind::FloorChangeDown, Position::new(127, 564, 7));
            })
        };

        let outcome = engine
            .wait_for_position(
                Position::new(120, 564, 6),
                Duration::from_secs(3),
                0,
                true,
            )
            .await;
        pusher.await.unwrap();
        match outcome {
            WaitOutcome::FloorChanged(pos) => assert_eq!(pos.z, 7),
            _ => panic!("expected FloorChanged"),
        }
    }

    /// Lure strategy: the flag is armed during playback and released
    /// when the monster threshold is met, then re-armed after combat
    /// clears.
    #[tokio::test]
    async fn test_lure_flag_cycle() {
        let world = SharedWorld::new();
        {
            let mut w = world.write();
            w.set_position(Position::new(100, 100, 7));
            // Three monsters adjacent: threshold met immediately.
            for i in 0..3u32 {
                w.apply_bridge_creature(
                    0x4000_0001 + i,
                    80,
                    Position::new(101 + i as u16, 100, 7),
                    "Rat",
                );
            }
        }
        let (bot, _) = test_context(world.clone());

        let config = PlaybackConfig {
            strategy: TargetingStrategy::Lure,
            lure_count: 3,
            lure_distance: 5,
            ..Default::default()
        };
        // Player already at the node target so the walk itself is a
        // no-op; the interesting part is the strategy hook.
        let engine = PlaybackEngine::new(bot, "lure", vec![walk_to(100, 100, 7, false)], config);

        // Clear the monsters shortly after the lure releases, so combat
        // "clears" and the engine can re-arm and finish.
        let clearer = {
            let world = world.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                let mut w = world.write();
                let ids: Vec<u32> = w.creatures().keys().copied().collect();
                for id in ids {
                    w.remove_creature(id);
                }
            })
        };

        engine.run().await;
        clearer.await.unwrap();
        // After a full cycle the flag is off (playback finished).
        assert!(!world.read().lure_active);
    }
}
