//! Recording → actions map compiler.
//!
//! Reduces a raw waypoint log (often hundreds of entries) to a short
//! navigation plan. Map clicks and keyboard walks collapse into
//! `walk_to` chains, repeated click targets become real interactions,
//! and the simplification pass is floor-aware so stair tiles always
//! survive.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cavebot::recording::{Recording, WalkKind, Waypoint};
use crate::codec::Position;

/// Fallback ground tile item id for pathfind clicks.
pub const DEFAULT_GROUND_ITEM: u16 = 4449;

/// Keep a path point whenever it is at least this far from the last
/// kept one.
const SIMPLIFY_MAX_GAP: u32 = 3;

/// How far around a walk group to look for a map-click that reveals the
/// real ground item id.
const GROUND_ID_SEARCH_MARGIN: usize = 3;

/// One node of the compiled plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionNode {
    WalkTo {
        target: Position,
        item_id: u16,
        stack_pos: u8,
        #[serde(default)]
        exact: bool,
    },
    UseItem {
        target: Position,
        item_id: u16,
        stack_pos: u8,
        index: u8,
        label: String,
        player_pos: Position,
    },
    UseItemEx {
        target: Position,
        from_pos: Position,
        item_id: u16,
        stack_pos: u8,
        to_pos: Position,
        to_stack_pos: u8,
        label: String,
        player_pos: Position,
    },
    WalkSteps {
        target: Position,
        start: Position,
        steps: Vec<WalkKind>,
        label: String,
    },
}

impl ActionNode {
    pub fn target(&self) -> Position {
        match self {
            ActionNode::WalkTo { target, .. }
            | ActionNode::UseItem { target, .. }
            | ActionNode::UseItemEx { target, .. }
            | ActionNode::WalkSteps { target, .. } => *target,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ActionNode::WalkTo { .. } => "walk_to",
            ActionNode::UseItem { .. } => "use_item",
            ActionNode::UseItemEx { .. } => "use_item_ex",
            ActionNode::WalkSteps { .. } => "walk_steps",
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, ActionNode::WalkTo { exact: true, .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct PathPoint {
    pos: Position,
    item_id: u16,
    stack_pos: u8,
}

/// True when a `use_item` is a map-click walk: the clicked tile is more
/// than one step away (x/y Manhattan), so the player cannot be
/// interacting with it directly. Clicks on other floors count too — the
/// client lets you click the floor above or below while walking.
fn is_map_click_walk(wp: &Waypoint) -> bool {
    match wp {
        Waypoint::UseItem { x, y, pos, .. } => {
            let item = Position::new(*x, *y, 0);
            let player = Position::new(pos.x, pos.y, 0);
            item.manhattan(&player) > 1
        }
        _ => false,
    }
}

fn click_target(wp: &Waypoint) -> Option<(u16, u16, u8)> {
    match wp {
        Waypoint::UseItem { x, y, z, .. } => Some((*x, *y, *z)),
        _ => None,
    }
}

/// Build the executable plan from a raw recording. Deterministic: the
/// same recording always compiles to the same plan.
pub fn build_actions_map(recording: &Recording) -> Vec<ActionNode> {
    let waypoints = &recording.waypoints;
    let mut nodes: Vec<ActionNode> = Vec::new();
    let mut first_ground_item: Option<u16> = None;

    let mut i = 0usize;
    while i < waypoints.len() {
        match &waypoints[i] {
            wp @ Waypoint::UseItem { .. } if is_map_click_walk(wp) => {
                let start = i;
                while i < waypoints.len() && is_map_click_walk(&waypoints[i]) {
                    i += 1;
                }
                let group = &waypoints[start..i];
                if first_ground_item.is_none() {
                    first_ground_item = group.iter().find_map(|wp| match wp {
                        Waypoint::UseItem { item_id, .. } => Some(*item_id),
                        _ => None,
                    });
                }
                compile_map_click_group(group, &mut nodes);
            }

            Waypoint::UseItem {
                x,
                y,
                z,
                item_id,
                stack_pos,
                index,
                label,
                pos,
                ..
            } => {
                nodes.push(ActionNode::UseItem {
                    target: Position::new(*x, *y, *z),
                    item_id: *item_id,
                    stack_pos: *stack_pos,
                    index: *index,
                    label: label.clone(),
                    player_pos: *pos,
                });
                i += 1;
            }

            Waypoint::UseItemEx {
                from_pos,
                item_id,
                stack_pos,
                to_pos,
                to_stack_pos,
                pos,
                ..
            } => {
                nodes.push(ActionNode::UseItemEx {
                    target: *to_pos,
                    from_pos: *from_pos,
                    item_id: *item_id,
                    stack_pos: *stack_pos,
                    to_pos: *to_pos,
                    to_stack_pos: *to_stack_pos,
                    label: format!("Use item {item_id}"),
                    player_pos: *pos,
                });
                i += 1;
            }

            Waypoint::Walk { .. } => {
                let start = i;
                let mut walks: Vec<&Waypoint> = Vec::new();
                while i < waypoints.len() {
                    match &waypoints[i] {
                        wp @ Waypoint::Walk { .. } => {
                            walks.push(wp);
                            i += 1;
                        }
                        // Informational waypoints never split a walk run.
                        Waypoint::Position { .. }
                        | Waypoint::FloorChange { .. }
                        | Waypoint::CancelWalk { .. } => i += 1,
                        _ => break,
                    }
                }
                let ground_item =
                    find_ground_item(waypoints, start, i, first_ground_item);
                compile_walk_group(&walks, ground_item, &mut nodes);
            }

            Waypoint::Position { .. }
            | Waypoint::FloorChange { .. }
            | Waypoint::CancelWalk { .. } => i += 1,
        }
    }

    mark_exact(&mut nodes);
    dedup_consecutive(nodes)
}

/// A run of map-click walks. Click targets seen at least twice are real
/// interactions (the player hammered on a ladder or door); single
/// clicks are walk waypoints. The walked path is rebuilt from the
/// player positions, which are always on the correct floor, plus the
/// final click target projected onto the player's floor.
fn compile_map_click_group(group: &[Waypoint], nodes: &mut Vec<ActionNode>) {
    let mut counts: HashMap<(u16, u16, u8), usize> = HashMap::new();
    for wp in group {
        if let Some(target) = click_target(wp) {
            *counts.entry(target).or_insert(0) += 1;
        }
    }

    let mut path: Vec<PathPoint> = Vec::new();
    for wp in group {
        let Waypoint::UseItem {
            x,
            y,
            z,
            item_id,
            stack_pos,
            index,
            label,
            pos,
            ..
        } = wp
        else {
            continue;
        };
        if counts.get(&(*x, *y, *z)).copied().unwrap_or(0) >= 2 {
            flush_path(&mut path, nodes);
            nodes.push(ActionNode::UseItem {
                target: Position::new(*x, *y, *z),
                item_id: *item_id,
                stack_pos: *stack_pos,
                index: *index,
                label: label.clone(),
                player_pos: *pos,
            });
        } else {
            push_path_point(
                &mut path,
                PathPoint {
                    pos: *pos,
                    item_id: *item_id,
                    stack_pos: *stack_pos,
                },
            );
        }
    }

    // The final walk click's destination, on the player's floor.
    if let Some(Waypoint::UseItem {
        x,
        y,
        z,
        item_id,
        stack_pos,
        pos,
        ..
    }) = group.last()
    {
        if counts.get(&(*x, *y, *z)).copied().unwrap_or(0) < 2 {
            push_path_point(
                &mut path,
                PathPoint {
                    pos: Position::new(*x, *y, pos.z),
                    item_id: *item_id,
                    stack_pos: *stack_pos,
                },
            );
        }
    }
    flush_path(&mut path, nodes);
}

/// Keyboard walks and autowalks. The recorded `pos` is already the
/// destination tile — it is used as-is, never re-offset.
fn compile_walk_group(walks: &[&Waypoint], ground_item: u16, nodes: &mut Vec<ActionNode>) {
    let mut path: Vec<PathPoint> = Vec::new();
    for wp in walks {
        let Waypoint::Walk { pos, .. } = wp else {
            continue;
        };
        push_path_point(
            &mut path,
            PathPoint {
                pos: *pos,
                item_id: ground_item,
                stack_pos: 1,
            },
        );
    }
    flush_path(&mut path, nodes);
}

fn find_ground_item(
    waypoints: &[Waypoint],
    group_start: usize,
    group_end: usize,
    first_ground_item: Option<u16>,
) -> u16 {
    let from = group_start.saturating_sub(GROUND_ID_SEARCH_MARGIN);
    let to = (group_end + GROUND_ID_SEARCH_MARGIN).min(waypoints.len());
    for wp in &waypoints[from..to] {
        if is_map_click_walk(wp) {
            if let Waypoint::UseItem { item_id, .. } = wp {
                return *item_id;
            }
        }
    }
    first_ground_item.unwrap_or(DEFAULT_GROUND_ITEM)
}

fn push_path_point(path: &mut Vec<PathPoint>, point: PathPoint) {
    if path.last().map(|last| last.pos == point.pos).unwrap_or(false) {
        return;
    }
    path.push(point);
}

fn flush_path(path: &mut Vec<PathPoint>, nodes: &mut Vec<ActionNode>) {
    for point in simplify_path(path) {
        nodes.push(ActionNode::WalkTo {
            target: point.pos,
            item_id: point.item_id,
            stack_pos: point.stack_pos,
            exact: false,
        });
    }
    path.clear();
}

/// Drop intermediate points closer than the gap to the last kept one.
/// The first and last points always survive, and so do both sides of
/// every floor boundary — dropping a stair tile would strand playback.
fn simplify_path(points: &[PathPoint]) -> Vec<PathPoint> {
    if points.len() <= 1 {
        return points.to_vec();
    }
    let mut kept = vec![points[0]];
    for i in 1..points.len() {
        let point = points[i];
        let is_last = i == points.len() - 1;
        let at_floor_boundary = points[i - 1].pos.z != point.pos.z
            || points
                .get(i + 1)
                .map(|next| next.pos.z != point.pos.z)
                .unwrap_or(false);
        let far_enough = kept
            .last()
            .map(|last| last.pos.manhattan(&point.pos) >= SIMPLIFY_MAX_GAP)
            .unwrap_or(true);
        if is_last || at_floor_boundary || far_enough {
            kept.push(point);
        }
    }
    kept
}

/// Post-pass: a `walk_to` directly before an interaction or a floor
/// crossing must land exactly on its tile.
fn mark_exact(nodes: &mut [ActionNode]) {
    for i in 0..nodes.len().saturating_sub(1) {
        let successor_is_interaction = matches!(
            nodes[i + 1],
            ActionNode::UseItem { .. } | ActionNode::UseItemEx { .. } | ActionNode::WalkSteps { .. }
        );
        let successor_z = nodes[i + 1].target().z;
        if let ActionNode::WalkTo { target, exact, .. } = &mut nodes[i] {
            if successor_is_interaction || successor_z != target.z {
                *exact = true;
            }
        }
    }
}

/// Collapse consecutive nodes with identical `(type, target)`. An exact
/// flag on a dropped duplicate is carried over to the survivor.
fn dedup_consecutive(nodes: Vec<ActionNode>) -> Vec<ActionNode> {
    let mut out: Vec<ActionNode> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let Some(last) = out.last_mut() {
            if last.type_name() == node.type_name() && last.target() == node.target() {
                if node.is_exact() {
                    if let ActionNode::WalkTo { exact, .. } = last {
                        *exact = true;
                    }
                }
                continue;
            }
        }
        out.push(node);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cavebot::recording::FloorDirection;

    const DIR_OFFSETS: [(WalkKind, (i16, i16)); 8] = [
        (WalkKind::North, (0, -1)),
        (WalkKind::South, (0, 1)),
        (WalkKind::East, (1, 0)),
        (WalkKind::West, (-1, 0)),
        (WalkKind::NorthEast, (1, -1)),
        (WalkKind::SouthEast, (1, 1)),
        (WalkKind::SouthWest, (-1, 1)),
        (WalkKind::NorthWest, (-1, -1)),
    ];

    fn offset(direction: WalkKind) -> (i16, i16) {
        DIR_OFFSETS
            .iter()
            .find(|(d, _)| *d == direction)
            .map(|(_, o)| *o)
            .unwrap()
    }

    /// Keyboard walk: `player_pos` is pre-walk, `pos` is the destination.
    fn walk(direction: WalkKind, player_pos: (u16, u16, u8)) -> Waypoint {
        let (dx, dy) = offset(direction);
        let player = Position::new(player_pos.0, player_pos.1, player_pos.2);
        Waypoint::Walk {
            direction,
            pos: Position::new(
                player.x.saturating_add_signed(dx),
                player.y.saturating_add_signed(dy),
                player.z,
            ),
            player_pos: Some(player),
            t: 0.0,
        }
    }

    /// Autowalk: `pos` is the final destination.
    fn autowalk(pos: (u16, u16, u8)) -> Waypoint {
        Waypoint::Walk {
            direction: WalkKind::Autowalk,
            pos: Position::new(pos.0, pos.1, pos.2),
            player_pos: None,
            t: 0.0,
        }
    }

    fn use_item(target: (u16, u16, u8), item_id: u16, player_pos: (u16, u16, u8)) -> Waypoint {
        Waypoint::UseItem {
            x: target.0,
            y: target.1,
            z: target.2,
            item_id,
            stack_pos: 0,
            index: 0,
            label: format!("Use item {item_id}"),
            pos: Position::new(player_pos.0, player_pos.1, player_pos.2),
            t: 0.0,
        }
    }

    fn use_item_ex(
        from: (u16, u16, u8),
        item_id: u16,
        to: (u16, u16, u8),
        player_pos: (u16, u16, u8),
    ) -> Waypoint {
        Waypoint::UseItemEx {
            from_pos: Position::new(from.0, from.1, from.2),
            item_id,
            stack_pos: 0,
            to_pos: Position::new(to.0, to.1, to.2),
            to_stack_pos: 0,
            pos: Position::new(player_pos.0, player_pos.1, player_pos.2),
            t: 0.0,
        }
    }

    fn position_wp(pos: (u16, u16, u8)) -> Waypoint {
        Waypoint::Position {
            pos: Position::new(pos.0, pos.1, pos.2),
            t: 0.0,
        }
    }

    fn floor_change(direction: FloorDirection, pos: (u16, u16, u8)) -> Waypoint {
        Waypoint::FloorChange {
            direction,
            pos: Position::new(pos.0, pos.1, pos.2),
            z: pos.2,
            t: 0.0,
        }
    }

    fn rec(waypoints: Vec<Waypoint>) -> Recording {
        Recording {
            name: "test".into(),
            created_at: 0,
            version: 1,
            start_position: Position::new(0, 0, 0),
            waypoints,
        }
    }

    fn targets(nodes: &[ActionNode]) -> Vec<(u16, u16, u8)> {
        nodes
            .iter()
            .map(|n| {
                let t = n.target();
                (t.x, t.y, t.z)
            })
            .collect()
    }

    // ── Trivial cases ──────────────────────────────────────────────

    #[test]
    fn test_empty_recording() {
        assert!(build_actions_map(&rec(vec![])).is_empty());
    }

    #[test]
    fn test_single_keyboard_walk() {
        let nodes = build_actions_map(&rec(vec![walk(WalkKind::North, (100, 200, 7))]));
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].target(), Position::new(100, 199, 7));
        assert!(matches!(nodes[0], ActionNode::WalkTo { .. }));
    }

    #[test]
    fn test_single_autowalk_uses_pos_directly() {
        let nodes = build_actions_map(&rec(vec![autowalk((137, 579, 6))]));
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].target(), Position::new(137, 579, 6));
    }

    /// P7: every walk destination is the recorded `pos`, never
    /// re-offset by the direction.
    #[test]
    fn test_no_double_offset_all_directions() {
        for (direction, (dx, dy)) in DIR_OFFSETS {
            let nodes = build_actions_map(&rec(vec![walk(direction, (100, 200, 7))]));
            let expected = Position::new(
                100u16.saturating_add_signed(dx),
                200u16.saturating_add_signed(dy),
                7,
            );
            assert_eq!(nodes[0].target(), expected, "direction {direction:?}");
        }
    }

    #[test]
    fn test_close_use_item_stays_interaction() {
        let nodes = build_actions_map(&rec(vec![use_item((100, 200, 7), 1696, (100, 201, 7))]));
        assert_eq!(nodes.len(), 1);
        match &nodes[0] {
            ActionNode::UseItem {
                target, item_id, ..
            } => {
                assert_eq!(*target, Position::new(100, 200, 7));
                assert_eq!(*item_id, 1696);
            }
            other => panic!("expected use_item, got {other:?}"),
        }
    }

    #[test]
    fn test_use_item_ex_preserved() {
        let nodes = build_actions_map(&rec(vec![use_item_ex(
            (0xFFFF, 0, 0),
            2120,
            (100, 200, 8),
            (100, 200, 7),
        )]));
        assert_eq!(nodes.len(), 1);
        match &nodes[0] {
            ActionNode::UseItemEx {
                target,
                from_pos,
                item_id,
                ..
            } => {
                assert_eq!(*target, Position::new(100, 200, 8));
                assert_eq!(from_pos.x, 0xFFFF);
                assert_eq!(*item_id, 2120);
            }
            other => panic!("expected use_item_ex, got {other:?}"),
        }
    }

    // ── Map-click classification ───────────────────────────────────

    #[test]
    fn test_map_click_classification() {
        assert!(is_map_click_walk(&use_item((110, 200, 7), 486, (100, 200, 7))));
        // Adjacent and same-tile clicks are interactions.
        assert!(!is_map_click_walk(&use_item((101, 200, 7), 1696, (100, 200, 7))));
        assert!(!is_map_click_walk(&use_item((100, 200, 7), 1968, (100, 200, 7))));
        // Distance ignores z: adjacent on another floor is still close.
        assert!(!is_map_click_walk(&use_item((101, 200, 6), 1968, (100, 200, 7))));
        // Distance exactly 2 is a map click.
        assert!(is_map_click_walk(&use_item((100, 202, 7), 486, (100, 200, 7))));
        assert!(!is_map_click_walk(&walk(WalkKind::North, (100, 200, 7))));
    }

    #[test]
    fn test_far_use_item_becomes_player_pos_plus_target() {
        let nodes = build_actions_map(&rec(vec![use_item((120, 200, 7), 486, (100, 200, 7))]));
        assert_eq!(targets(&nodes), vec![(100, 200, 7), (120, 200, 7)]);
        for node in &nodes {
            assert!(matches!(node, ActionNode::WalkTo { .. }));
        }
    }

    #[test]
    fn test_map_click_on_other_floor_projected_to_player_floor() {
        // Clicking a tile visible on z=6 while standing on z=7 walks on 7.
        let nodes = build_actions_map(&rec(vec![use_item((120, 200, 6), 486, (100, 200, 7))]));
        assert_eq!(nodes.last().unwrap().target().z, 7);
    }

    #[test]
    fn test_map_click_ground_item_recorded() {
        let nodes = build_actions_map(&rec(vec![use_item((110, 200, 7), 486, (100, 200, 7))]));
        match &nodes[0] {
            ActionNode::WalkTo { item_id, .. } => assert_eq!(*item_id, 486),
            other => panic!("expected walk_to, got {other:?}"),
        }
    }

    #[test]
    fn test_repeated_click_target_becomes_interaction() {
        // Same far target clicked twice inside one group: a ladder the
        // player hammered on, not a walk click.
        let nodes = build_actions_map(&rec(vec![
            use_item((120, 200, 7), 1968, (100, 200, 7)),
            use_item((120, 200, 7), 1968, (102, 200, 7)),
        ]));
        let use_items: Vec<_> = nodes
            .iter()
            .filter(|n| matches!(n, ActionNode::UseItem { .. }))
            .collect();
        assert_eq!(use_items.len(), 1);
        assert_eq!(use_items[0].target(), Position::new(120, 200, 7));
    }

    #[test]
    fn test_single_clicks_in_group_stay_walks() {
        let nodes = build_actions_map(&rec(vec![
            use_item((105, 200, 7), 486, (100, 200, 7)),
            use_item((110, 200, 7), 486, (105, 200, 7)),
            use_item((115, 200, 7), 486, (110, 200, 7)),
        ]));
        for node in &nodes {
            assert!(matches!(node, ActionNode::WalkTo { .. }));
        }
        assert!(nodes.len() >= 2);
    }

    // ── Walk grouping & simplification ─────────────────────────────

    #[test]
    fn test_consecutive_walks_simplified() {
        let wps = vec![
            walk(WalkKind::North, (100, 205, 7)),
            walk(WalkKind::North, (100, 204, 7)),
            walk(WalkKind::North, (100, 203, 7)),
            walk(WalkKind::North, (100, 202, 7)),
            walk(WalkKind::North, (100, 201, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));
        for node in &nodes {
            assert!(matches!(node, ActionNode::WalkTo { .. }));
        }
        assert_eq!(nodes.first().unwrap().target(), Position::new(100, 204, 7));
        assert_eq!(nodes.last().unwrap().target(), Position::new(100, 200, 7));
        assert!(nodes.len() < 5);
    }

    #[test]
    fn test_duplicate_walk_destinations_collapse() {
        let wps = vec![
            walk(WalkKind::North, (100, 200, 7)),
            walk(WalkKind::North, (100, 200, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].target(), Position::new(100, 199, 7));
    }

    #[test]
    fn test_long_walk_sequence_reduced() {
        let wps: Vec<Waypoint> = (0..20)
            .map(|i| walk(WalkKind::North, (100, 200 - i, 7)))
            .collect();
        let nodes = build_actions_map(&rec(wps));
        assert!(nodes.len() < 20);
        assert!(nodes.first().unwrap().target().y < 200);
        assert!(nodes.last().unwrap().target().y < nodes.first().unwrap().target().y);
    }

    #[test]
    fn test_position_waypoints_do_not_split_groups() {
        let wps = vec![
            walk(WalkKind::East, (100, 200, 7)),
            position_wp((101, 200, 7)),
            position_wp((102, 200, 7)),
            walk(WalkKind::East, (103, 201, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));
        assert_eq!(
            targets(&nodes),
            vec![(101, 200, 7), (104, 201, 7)],
            "one group, two endpoints"
        );
    }

    #[test]
    fn test_position_only_recording_is_empty() {
        let wps = vec![
            position_wp((100, 200, 7)),
            position_wp((101, 200, 7)),
        ];
        assert!(build_actions_map(&rec(wps)).is_empty());
    }

    #[test]
    fn test_autowalks_group_with_keyboard_walks() {
        let wps = vec![
            autowalk((100, 200, 7)),
            walk(WalkKind::East, (101, 200, 7)),
            autowalk((103, 200, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));
        for node in &nodes {
            assert!(matches!(node, ActionNode::WalkTo { .. }));
        }
    }

    // ── Ground item inference ──────────────────────────────────────

    #[test]
    fn test_walks_use_default_ground_id() {
        let nodes = build_actions_map(&rec(vec![walk(WalkKind::North, (100, 200, 7))]));
        match &nodes[0] {
            ActionNode::WalkTo { item_id, .. } => assert_eq!(*item_id, DEFAULT_GROUND_ITEM),
            other => panic!("expected walk_to, got {other:?}"),
        }
    }

    #[test]
    fn test_walks_borrow_ground_id_from_nearby_map_click() {
        let wps = vec![
            use_item((120, 200, 7), 486, (100, 200, 7)),
            walk(WalkKind::North, (120, 200, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));
        let found = nodes.iter().any(|n| match n {
            ActionNode::WalkTo { item_id, .. } => *item_id == 486,
            _ => false,
        });
        assert!(found, "walk group should borrow 486: {nodes:?}");
    }

    // ── Exact marking ──────────────────────────────────────────────

    #[test]
    fn test_walk_before_use_item_is_exact() {
        let wps = vec![
            autowalk((100, 200, 7)),
            use_item((100, 200, 7), 1696, (100, 200, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));
        let walk_node = nodes
            .iter()
            .find(|n| matches!(n, ActionNode::WalkTo { .. }))
            .unwrap();
        assert!(walk_node.is_exact());
    }

    #[test]
    fn test_walk_before_use_item_ex_is_exact() {
        let wps = vec![
            autowalk((100, 200, 7)),
            use_item_ex((0xFFFF, 0, 0), 2120, (100, 200, 8), (100, 200, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));
        let walk_node = nodes
            .iter()
            .find(|n| matches!(n, ActionNode::WalkTo { .. }))
            .unwrap();
        assert!(walk_node.is_exact());
    }

    #[test]
    fn test_plain_walks_not_exact_and_last_never_exact() {
        let wps = vec![autowalk((100, 200, 7)), autowalk((105, 200, 7))];
        let nodes = build_actions_map(&rec(wps));
        for node in &nodes {
            assert!(!node.is_exact());
        }
    }

    // ── Floor transitions (P6, S4) ─────────────────────────────────

    /// S4: the stair tile survives simplification, is the last node on
    /// its floor, and is exact; the next node is on the new floor.
    #[test]
    fn test_stair_preservation_scenario() {
        let wps = vec![
            walk(WalkKind::West, (131, 564, 6)),
            walk(WalkKind::West, (130, 564, 6)),
            walk(WalkKind::West, (129, 564, 6)), // pos: (128,564,6) — the stair
            walk(WalkKind::West, (126, 564, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));
        let all = targets(&nodes);
        assert!(all.contains(&(128, 564, 6)), "stair tile missing: {all:?}");

        let stair_index = all.iter().position(|t| *t == (128, 564, 6)).unwrap();
        assert!(nodes[stair_index].is_exact(), "stair tile must be exact");
        assert_eq!(nodes[stair_index + 1].target().z, 7);
    }

    #[test]
    fn test_long_stair_walk_keeps_boundary_points() {
        let wps = vec![
            walk(WalkKind::West, (136, 564, 6)),
            walk(WalkKind::West, (136, 564, 6)), // dup
            walk(WalkKind::West, (134, 564, 6)),
            walk(WalkKind::West, (133, 564, 6)),
            walk(WalkKind::West, (131, 564, 6)),
            walk(WalkKind::West, (130, 564, 6)),
            walk(WalkKind::West, (129, 564, 6)), // pos: (128,564,6) — stair
            walk(WalkKind::West, (126, 564, 7)), // pos: (125,564,7) — first on 7
            walk(WalkKind::West, (125, 564, 7)),
            walk(WalkKind::West, (123, 564, 7)),
            walk(WalkKind::West, (122, 564, 7)),
            walk(WalkKind::West, (120, 564, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));

        let floor6: Vec<_> = nodes.iter().filter(|n| n.target().z == 6).collect();
        assert_eq!(floor6.last().unwrap().target(), Position::new(128, 564, 6));
        assert!(floor6.last().unwrap().is_exact());

        let floor7: Vec<_> = nodes.iter().filter(|n| n.target().z == 7).collect();
        assert_eq!(floor7.first().unwrap().target(), Position::new(125, 564, 7));
    }

    #[test]
    fn test_floor_change_event_between_walks_no_double_offset() {
        // The recorded stream interleaves a floor_change event between
        // the stair walk and the first walk on the new floor.
        let wps = vec![
            walk(WalkKind::West, (129, 564, 6)), // pos: (128,564,6) — stair
            floor_change(FloorDirection::Down, (127, 564, 7)),
            walk(WalkKind::West, (127, 564, 7)), // pos: (126,564,7)
        ];
        let nodes = build_actions_map(&rec(wps));
        let all = targets(&nodes);

        assert!(all.contains(&(128, 564, 6)));
        assert!(
            !all.contains(&(127, 564, 6)),
            "double-offset artefact present: {all:?}"
        );
        assert!(all.contains(&(126, 564, 7)));

        let floor6: Vec<_> = nodes.iter().filter(|n| n.target().z == 6).collect();
        assert!(floor6.last().unwrap().is_exact());
    }

    #[test]
    fn test_only_boundary_node_is_exact() {
        let wps = vec![
            walk(WalkKind::South, (100, 195, 7)),
            walk(WalkKind::South, (100, 196, 7)),
            walk(WalkKind::South, (100, 197, 7)),
            walk(WalkKind::South, (100, 198, 7)),
            walk(WalkKind::South, (100, 199, 7)),
            walk(WalkKind::South, (100, 200, 7)), // pos: (100,201,7) — stair
            walk(WalkKind::South, (100, 201, 6)),
        ];
        let nodes = build_actions_map(&rec(wps));
        for node in &nodes {
            let t = node.target();
            if t.z == 7 && (t.x, t.y) != (100, 201) {
                assert!(!node.is_exact(), "only the stair tile may be exact: {t}");
            }
        }
        let stair = nodes
            .iter()
            .find(|n| n.target() == Position::new(100, 201, 7))
            .unwrap();
        assert!(stair.is_exact());
    }

    #[test]
    fn test_alternating_floors_all_boundaries_exact() {
        let wps = vec![
            walk(WalkKind::North, (100, 203, 6)),
            walk(WalkKind::North, (100, 202, 6)),
            walk(WalkKind::North, (100, 201, 7)),
            walk(WalkKind::North, (100, 200, 7)),
            walk(WalkKind::North, (100, 199, 6)),
        ];
        let nodes = build_actions_map(&rec(wps));
        for i in 0..nodes.len() - 1 {
            if nodes[i].target().z != nodes[i + 1].target().z {
                assert!(
                    nodes[i].is_exact(),
                    "node {:?} before a floor change must be exact",
                    nodes[i].target()
                );
            }
        }
    }

    // ── Dedup ──────────────────────────────────────────────────────

    #[test]
    fn test_consecutive_duplicates_collapse() {
        let wps = vec![autowalk((100, 200, 7)); 10];
        let nodes = build_actions_map(&rec(wps));
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn test_duplicate_use_items_dedup_by_type_and_target() {
        let one = use_item((100, 200, 7), 1054, (99, 200, 7));
        let two = use_item((100, 200, 7), 1058, (99, 200, 7));
        let nodes = build_actions_map(&rec(vec![one, two]));
        // Dedup looks at type + target only.
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn test_non_consecutive_duplicates_kept() {
        let wps = vec![
            autowalk((100, 200, 7)),
            use_item((100, 201, 7), 1696, (100, 200, 7)),
            autowalk((100, 200, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn test_walk_and_use_item_same_target_both_kept() {
        let wps = vec![
            autowalk((100, 200, 7)),
            use_item((100, 200, 7), 1696, (100, 201, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));
        assert_eq!(nodes.len(), 2);
    }

    // ── Mixed sequences & determinism ──────────────────────────────

    #[test]
    fn test_node_ordering_preserved() {
        let wps = vec![
            autowalk((100, 200, 7)),
            use_item((100, 200, 7), 1696, (100, 200, 7)),
            autowalk((110, 200, 7)),
            use_item_ex((0xFFFF, 0, 0), 2120, (110, 200, 8), (110, 200, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));
        let kinds: Vec<_> = nodes.iter().map(|n| n.type_name()).collect();
        assert_eq!(kinds, vec!["walk_to", "use_item", "walk_to", "use_item_ex"]);
    }

    #[test]
    fn test_walks_interrupted_by_door() {
        let wps = vec![
            walk(WalkKind::East, (135, 564, 6)),
            walk(WalkKind::East, (136, 564, 6)),
            use_item((137, 564, 6), 1696, (137, 564, 6)),
            walk(WalkKind::West, (137, 564, 6)),
            walk(WalkKind::West, (136, 564, 6)),
        ];
        let nodes = build_actions_map(&rec(wps));
        let door_index = nodes
            .iter()
            .position(|n| matches!(n, ActionNode::UseItem { .. }))
            .unwrap();
        assert!(door_index > 0);
        assert!(nodes[door_index - 1].is_exact());
        assert!(
            nodes.len() > door_index + 1,
            "walks after the door must produce nodes"
        );
    }

    /// P5: compilation is deterministic.
    #[test]
    fn test_compiler_determinism() {
        let wps = vec![
            use_item((120, 200, 7), 486, (100, 200, 7)),
            walk(WalkKind::North, (120, 200, 7)),
            walk(WalkKind::North, (120, 199, 7)),
            use_item((120, 197, 7), 1696, (120, 198, 7)),
            autowalk((125, 197, 7)),
        ];
        let recording = rec(wps);
        assert_eq!(build_actions_map(&recording), build_actions_map(&recording));
    }

    #[test]
    fn test_very_long_recording_reduced() {
        let mut wps: Vec<Waypoint> = (0..50)
            .map(|i| walk(WalkKind::East, (100 + i, 200, 7)))
            .collect();
        wps.push(use_item((151, 200, 7), 1696, (150, 200, 7)));
        wps.extend((0..50).map(|i| walk(WalkKind::West, (150 - i, 200, 7))));
        let nodes = build_actions_map(&rec(wps));
        assert!(!nodes.is_empty());
        assert!(nodes.len() < 100);
        let doors: Vec<_> = nodes
            .iter()
            .filter(|n| matches!(n, ActionNode::UseItem { .. }))
            .collect();
        assert_eq!(doors.len(), 1);
    }

    #[test]
    fn test_actions_map_json_shape() {
        let wps = vec![
            autowalk((100, 200, 7)),
            use_item((100, 200, 7), 1696, (100, 200, 7)),
        ];
        let nodes = build_actions_map(&rec(wps));
        let json = serde_json::to_string(&nodes).unwrap();
        assert!(json.contains("\"type\":\"walk_to\""));
        assert!(json.contains("\"exact\":true"));
        let back: Vec<ActionNode> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, nodes);
    }
}
