use serde::{Deserialize, Serialize};

/// Absolute map position. Valid coordinates are x,y in [100, 65000] and
/// z in [0, 15].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: u16,
    pub y: u16,
    pub z: u8,
}

impl Position {
    pub fn new(x: u16, y: u16, z: u8) -> Self {
        Self { x, y, z }
    }

    pub fn is_valid(&self) -> bool {
        (100..=65000).contains(&self.x) && (100..=65000).contains(&self.y) && self.z <= 15
    }

    /// Manhattan distance on the x/y plane, ignoring floors.
    pub fn manhattan(&self, other: &Position) -> u32 {
        self.x.abs_diff(other.x) as u32 + self.y.abs_diff(other.y) as u32
    }

    /// Chebyshev distance on the x/y plane (adjacency metric).
    pub fn chebyshev(&self, other: &Position) -> u32 {
        (self.x.abs_diff(other.x) as u32).max(self.y.abs_diff(other.y) as u32)
    }

    /// The position one step away in `direction`, saturating at the map edge.
    pub fn step(&self, direction: Direction) -> Position {
        let (dx, dy) = direction.offset();
        Position {
            x: self.x.saturating_add_signed(dx),
            y: self.y.saturating_add_signed(dy),
            z: self.z,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// 8-way walk direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    East,
    South,
    West,
    NorthEast,
    SouthEast,
    SouthWest,
    NorthWest,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
        Direction::NorthEast,
        Direction::SouthEast,
        Direction::SouthWest,
        Direction::NorthWest,
    ];

    pub const CARDINAL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Tile offset (dx, dy) for a single step.
    pub fn offset(&self) -> (i16, i16) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
            Direction::NorthEast => (1, -1),
            Direction::SouthEast => (1, 1),
            Direction::SouthWest => (-1, 1),
            Direction::NorthWest => (-1, -1),
        }
    }

    /// Parse a direction name or shorthand (`n`, `ne`, `north`, ...).
    pub fn parse(name: &str) -> Option<Direction> {
        match name.to_ascii_lowercase().as_str() {
            "n" | "north" => Some(Direction::North),
            "e" | "east" => Some(Direction::East),
            "s" | "south" => Some(Direction::South),
            "w" | "west" => Some(Direction::West),
            "ne" | "northeast" => Some(Direction::NorthEast),
            "se" | "southeast" => Some(Direction::SouthEast),
            "sw" | "southwest" => Some(Direction::SouthWest),
            "nw" | "northwest" => Some(Direction::NorthWest),
            _ => None,
        }
    }

    /// Best single-step direction from `from` toward `to`, preferring
    /// diagonals when both axes need correction.
    pub fn toward(from: Position, to: Position) -> Option<Direction> {
        let dx = to.x as i32 - from.x as i32;
        let dy = to.y as i32 - from.y as i32;
        match (dx.signum(), dy.signum()) {
            (0, 0) => None,
            (1, -1) => Some(Direction::NorthEast),
            (1, 1) => Some(Direction::SouthEast),
            (-1, -1) => Some(Direction::NorthWest),
            (-1, 1) => Some(Direction::SouthWest),
            (1, 0) => Some(Direction::East),
            (-1, 0) => Some(Direction::West),
            (0, -1) => Some(Direction::North),
            _ => Some(Direction::South),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_all_directions() {
        let start = Position::new(100, 200, 7);
        for dir in Direction::ALL {
            let (dx, dy) = dir.offset();
            let moved = start.step(dir);
            assert_eq!(moved.x as i32, 100 + dx as i32);
            assert_eq!(moved.y as i32, 200 + dy as i32);
            assert_eq!(moved.z, 7);
        }
    }

    #[test]
    fn test_toward_prefers_diagonal() {
        let from = Position::new(100, 100, 7);
        assert_eq!(
            Direction::toward(from, Position::new(105, 95, 7)),
            Some(Direction::NorthEast)
        );
        assert_eq!(
            Direction::toward(from, Position::new(100, 105, 7)),
            Some(Direction::South)
        );
        assert_eq!(Direction::toward(from, from), None);
    }

    #[test]
    fn test_direction_serde_names() {
        let json = serde_json::to_string(&Direction::NorthWest).unwrap();
        assert_eq!(json, "\"northwest\"");
        let dir: Direction = serde_json::from_str("\"southeast\"").unwrap();
        assert_eq!(dir, Direction::SouthEast);
    }

    #[test]
    fn test_manhattan_ignores_z() {
        let a = Position::new(100, 200, 7);
        let b = Position::new(103, 198, 6);
        assert_eq!(a.manhattan(&b), 5);
        assert_eq!(a.chebyshev(&b), 3);
    }
}
