//! Screen topology domain entity.
//!
//! Screens live in a shared virtual coordinate space, each with an origin
//! and size, and are wired together by *directed* edges: "left of `desk`
//! is `laptop`". Edges need not be symmetric and a linked screen need not
//! be online — neighbor resolution walks the edge graph and skips over
//! configured-but-offline screens until it reaches one that is connected,
//! giving up when the walk cycles or runs off the map.
//!
//! Coordinate remapping between screens of different sizes is fractional:
//! the position along the crossed edge is converted to a fraction of the
//! source screen's extent and back to pixels on the destination.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

/// The four edges of a rectangular screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
    Top,
    Bottom,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Right,
        Direction::Top,
        Direction::Bottom,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::Top => Direction::Bottom,
            Direction::Bottom => Direction::Top,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Top => "top",
            Direction::Bottom => "bottom",
        }
    }
}

/// A screen's position and size in the shared virtual coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenShape {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ScreenShape {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Rightmost column (inclusive).
    pub fn right(&self) -> i32 {
        self.x + self.width - 1
    }

    /// Bottommost row (inclusive).
    pub fn bottom(&self) -> i32 {
        self.y + self.height - 1
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x <= self.right() && y >= self.y && y <= self.bottom()
    }
}

/// Converts a position on `shape`'s `dir` edge to a fraction of the edge
/// length. Left/right edges use the y coordinate, top/bottom the x.
/// The half-pixel offset keeps the mapping centered on the pixel.
pub fn map_to_fraction(shape: &ScreenShape, dir: Direction, x: i32, y: i32) -> f32 {
    match dir {
        Direction::Left | Direction::Right => (y - shape.y) as f32 + 0.5,
        Direction::Top | Direction::Bottom => (x - shape.x) as f32 + 0.5,
    }
    .max(0.0)
        / match dir {
            Direction::Left | Direction::Right => shape.height as f32,
            Direction::Top | Direction::Bottom => shape.width as f32,
        }
}

/// Inverse of [`map_to_fraction`]: the pixel coordinate along `shape`'s
/// `dir` edge for a given fraction. Returns a y for left/right and an x
/// for top/bottom.
pub fn map_to_pixel(shape: &ScreenShape, dir: Direction, fraction: f32) -> i32 {
    match dir {
        Direction::Left | Direction::Right => (fraction * shape.height as f32) as i32 + shape.y,
        Direction::Top | Direction::Bottom => (fraction * shape.width as f32) as i32 + shape.x,
    }
}

/// Errors raised while building a topology.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("screen \"{0}\" is configured more than once")]
    DuplicateScreen(String),

    #[error("link references unknown screen \"{0}\"")]
    UnknownScreen(String),
}

/// The directed neighbor graph of all configured screens.
///
/// Pure data: connectivity is the coordinator's knowledge, so neighbor
/// resolution takes an `is_connected` predicate rather than reaching into
/// the client set.
#[derive(Debug, Clone, Default)]
pub struct TopologyMap {
    screens: BTreeSet<String>,
    edges: HashMap<(String, Direction), String>,
}

impl TopologyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a screen name.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::DuplicateScreen`] if the name is taken.
    pub fn add_screen(&mut self, name: &str) -> Result<(), TopologyError> {
        if !self.screens.insert(name.to_string()) {
            return Err(TopologyError::DuplicateScreen(name.to_string()));
        }
        Ok(())
    }

    /// Adds (or replaces) the directed edge `from --dir--> to`.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::UnknownScreen`] if either endpoint has not
    /// been registered.
    pub fn link(&mut self, from: &str, dir: Direction, to: &str) -> Result<(), TopologyError> {
        if !self.screens.contains(from) {
            return Err(TopologyError::UnknownScreen(from.to_string()));
        }
        if !self.screens.contains(to) {
            return Err(TopologyError::UnknownScreen(to.to_string()));
        }
        self.edges.insert((from.to_string(), dir), to.to_string());
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.screens.contains(name)
    }

    pub fn screens(&self) -> impl Iterator<Item = &str> {
        self.screens.iter().map(String::as_str)
    }

    /// The directly configured neighbor, connected or not.
    pub fn configured_neighbor(&self, from: &str, dir: Direction) -> Option<&str> {
        self.edges
            .get(&(from.to_string(), dir))
            .map(String::as_str)
    }

    /// True if `from` has any configured neighbor on `dir`, online or not.
    /// An edge without a neighbor cannot provoke a switch, which is what
    /// jump-zone clamping cares about.
    pub fn has_neighbor(&self, from: &str, dir: Direction) -> bool {
        self.configured_neighbor(from, dir).is_some()
    }

    /// Resolves the first *connected* screen in direction `dir` of `from`,
    /// walking over configured-but-offline screens. Returns `None` when
    /// the walk cycles (including back to `from`) or leaves the map.
    pub fn neighbor<F>(&self, from: &str, dir: Direction, is_connected: F) -> Option<&str>
    where
        F: Fn(&str) -> bool,
    {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(from);

        let mut current = from;
        loop {
            let next = self.configured_neighbor(current, dir)?;
            if !visited.insert(next) {
                // walked into a loop without finding anyone online
                return None;
            }
            if is_connected(next) {
                return Some(next);
            }
            tracing::debug!(screen = next, dir = dir.name(), "skipping offline screen");
            current = next;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
