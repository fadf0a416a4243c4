//! Level geometry and collision queries
//!
//! A level is a 7-column grid of cells running along z. Each cell may hold a
//! flat tile, a raised cube and/or a tunnel ring. The grid is built once from
//! decoded level bytes and only read afterwards; every query here is a pure
//! function of the level and the probe position.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fixed::round_half_up;

/// Cells across the track
pub const LEVEL_WIDTH: usize = 7;
/// Bytes per encoded cell (colour byte, flag byte)
pub const CELL_BYTES: usize = 2;
/// Palette entries stored in a level header
pub const PALETTE_SIZE: usize = 72;
/// Header bytes before the palette (gravity, fuel, oxygen as u16)
pub const HEADER_BYTES: usize = 6;

/// World x of the left edge of the grid
pub const GRID_LEFT: f64 = 95.0;
/// Width of the grid in world units
pub const GRID_SPAN: f64 = 322.0;
/// Width of one cell column in world units
pub const CELL_WIDTH: f64 = 46.0;
/// Half-width of the ship used when probing for supporting cells
pub const SHIP_HALF_WIDTH: f64 = 14.0;

/// Height of a flat tile surface
pub const FLOOR_HEIGHT: f64 = 0x2800 as f64 / 0x80 as f64;
/// Lower bound (exclusive) of the solid band below the floor surface
pub const LOW_CORRIDOR_FLOOR: f64 = 0x1e80 as f64 / 0x80 as f64;
/// Below this height nothing above a cell is solid
pub const SOLID_FLOOR_MIN: f64 = 0x2180 as f64 / 0x80 as f64;
/// Tunnel cross-section tables are relative to this height
const TUNNEL_BASE: f64 = 68.0;
/// Probes further than this from a column centre never hit its geometry
const MAX_PROBE_DISTANCE: f64 = 37.0;

/// Tunnel ceiling per distance from column centre
const TUN_CEILS: [f64; 38] = [
    32.0, 32.0, 32.0, 32.0, 32.0, 32.0, 32.0, 32.0, //
    32.0, 32.0, 32.0, 32.0, 32.0, 32.0, 32.0, 32.0, //
    32.0, 31.0, 31.0, 31.0, 31.0, 31.0, 30.0, 30.0, //
    30.0, 29.0, 29.0, 29.0, 28.0, 27.0, 26.0, 25.0, //
    24.0, 22.0, 20.0, 18.0, 17.0, 14.0,
];

/// Tunnel wall low point per distance from column centre.
///
/// Shorter than the ceiling table: distances past its end have no floor
/// bound, so every comparison against it fails.
const TUN_LOWS: [f64; 30] = [
    16.0, 16.0, 16.0, 16.0, 15.0, 14.0, 13.0, 11.0, //
    8.0, 7.0, 6.0, 5.0, 3.0, 3.0, 3.0, 3.0, //
    3.0, 3.0, 2.0, 1.0, 0.0, 0.0, 0.0, 0.0, //
    0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
];

/// Errors raised while building a level from decoded bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LevelError {
    #[error("level data too short: got {actual} bytes, need at least {min}")]
    TooShort { actual: usize, min: usize },
    #[error("cell data length {len} is not a whole number of {row_bytes}-byte rows")]
    RaggedCells { len: usize, row_bytes: usize },
    #[error("level index truncated at byte {offset}")]
    IndexTruncated { offset: usize },
}

/// What happens when the ship rests on a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TouchEffect {
    #[default]
    None,
    Accelerate,
    Decelerate,
    Kill,
    Slide,
    RefillOxygen,
}

impl TouchEffect {
    /// Effect encoded by a 4-bit colour index
    pub fn from_color_index(index: u8) -> Self {
        match index {
            10 => TouchEffect::Accelerate,
            12 => TouchEffect::Kill,
            9 => TouchEffect::RefillOxygen,
            8 => TouchEffect::Slide,
            2 => TouchEffect::Decelerate,
            _ => TouchEffect::None,
        }
    }
}

/// Palette colour (VGA 6-bit components scaled by 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u16,
    pub g: u16,
    pub b: u16,
}

impl Color {
    pub fn from_vga(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as u16 * 4,
            g: g as u16 * 4,
            b: b as u16 * 4,
        }
    }
}

/// Face colours of a tile or cube
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CubeColors {
    pub left: Color,
    pub right: Color,
    pub top: Color,
    pub front: Color,
}

/// Flat touch plate at floor height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub effect: TouchEffect,
    pub color_index: u8,
}

/// Raised block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cube {
    /// Top surface height; `None` for the flag combination that has no
    /// height entry (such a cube is never solid and never touched)
    pub height: Option<f64>,
    pub effect: TouchEffect,
    /// Colour index of the top face (0 = default cube colours)
    pub top_color_index: u8,
}

impl Cube {
    /// Height for the cube bits of a cell flag byte
    pub fn height_for_flags(flags: u8) -> Option<f64> {
        match flags & 6 {
            2 => Some(100.0),
            4 => Some(120.0),
            _ => None,
        }
    }
}

/// One grid cell
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Cell {
    pub tile: Option<Tile>,
    pub cube: Option<Cube>,
    pub tunnel: bool,
    /// Raw colour byte as stored in the level data
    pub raw: u8,
}

static EMPTY_CELL: Cell = Cell::EMPTY;

impl Cell {
    /// Sentinel returned for lookups outside the grid
    pub const EMPTY: Cell = Cell {
        tile: None,
        cube: None,
        tunnel: false,
        raw: 0,
    };

    /// Decode a cell from its colour byte and flag byte
    pub fn from_raw(color: u8, flags: u8) -> Self {
        let low = color & 0xF;
        let high = color >> 4;

        let tunnel = flags & 1 != 0;
        let cube = (flags & 6 != 0).then(|| Cube {
            height: Cube::height_for_flags(flags),
            effect: TouchEffect::from_color_index(high),
            top_color_index: high,
        });
        let tile = (low > 0).then(|| Tile {
            effect: TouchEffect::from_color_index(low),
            color_index: low,
        });

        Self {
            tile,
            cube,
            tunnel,
            raw: color,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cube.is_none() && self.tile.is_none() && !self.tunnel
    }
}

/// Distance of `x` from the nearest column centre, and the x offset of the
/// neighbouring column on the other side of the probe.
///
/// The grid repeats every [`CELL_WIDTH`] units, so shifting `x` by a whole
/// column yields the same pair.
pub fn distance_from_center(x: f64) -> (f64, f64) {
    let mut dist = 23.0 - (x - 49.0) % CELL_WIDTH;
    let mut neighbour = -CELL_WIDTH;
    if dist < 0.0 {
        dist = 1.0 - dist;
        neighbour = CELL_WIDTH;
    }
    (dist, neighbour)
}

fn probe_index(dist: f64) -> Option<usize> {
    let d = round_half_up(dist);
    if d > MAX_PROBE_DISTANCE {
        None
    } else {
        Some(d.max(0.0) as usize)
    }
}

/// Whether height `y` at `dist` from the column centre hits the geometry of `cell`
pub fn is_inside_tile_y(y: f64, dist: f64, cell: &Cell) -> bool {
    let Some(d) = probe_index(dist) else {
        return false;
    };

    let y2 = y - TUNNEL_BASE;
    let above_tunnel_low = TUN_LOWS.get(d).is_some_and(|&low| y2 > low);
    let below_cube_top = |cube: &Cube| cube.height.is_some_and(|h| y < h);

    match (cell.tunnel, cell.cube.as_ref()) {
        (true, None) => above_tunnel_low && y2 < TUN_CEILS[d],
        (false, Some(cube)) => below_cube_top(cube),
        (true, Some(cube)) => above_tunnel_low && below_cube_top(cube),
        (false, None) => false,
    }
}

/// Whether height `y` at `dist` from the column centre sits in the floor of a tunnel
pub fn is_inside_tunnel_y(y: f64, dist: f64, cell: &Cell) -> bool {
    let Some(d) = probe_index(dist) else {
        return false;
    };

    let y2 = y - TUNNEL_BASE;
    cell.tunnel
        && cell.tile.is_some()
        && TUN_LOWS.get(d).is_some_and(|&low| y2 < low)
        && y >= FLOOR_HEIGHT
}

/// Immutable level: grid, physics constants and palette
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    pub name: String,
    pub gravity: u16,
    pub fuel: u16,
    pub oxygen: u16,
    pub colors: Vec<Color>,
    /// Columns indexed `[x][z]`
    cells: Vec<Vec<Cell>>,
}

impl Level {
    /// Build a level from already-decoded columns (`cells[x][z]`)
    pub fn new(
        name: impl Into<String>,
        gravity: u16,
        fuel: u16,
        oxygen: u16,
        colors: Vec<Color>,
        cells: Vec<Vec<Cell>>,
    ) -> Self {
        Self {
            name: name.into(),
            gravity,
            fuel,
            oxygen,
            colors,
            cells,
        }
    }

    /// Build a level from decompressed cell bytes (two bytes per cell, rows of 7)
    pub fn from_cell_bytes(
        name: impl Into<String>,
        gravity: u16,
        fuel: u16,
        oxygen: u16,
        colors: Vec<Color>,
        bytes: &[u8],
    ) -> Result<Self, LevelError> {
        let row_bytes = LEVEL_WIDTH * CELL_BYTES;
        if bytes.len() % row_bytes != 0 {
            return Err(LevelError::RaggedCells {
                len: bytes.len(),
                row_bytes,
            });
        }

        let length = bytes.len() / row_bytes;
        let cells = (0..LEVEL_WIDTH)
            .map(|x| {
                (0..length)
                    .map(|z| {
                        let idx = x * CELL_BYTES + z * row_bytes;
                        Cell::from_raw(bytes[idx], bytes[idx + 1])
                    })
                    .collect()
            })
            .collect();

        Ok(Self::new(name, gravity, fuel, oxygen, colors, cells))
    }

    /// Build a level from a decoded blob: header, palette, then cell bytes
    pub fn from_decoded(name: impl Into<String>, bytes: &[u8]) -> Result<Self, LevelError> {
        let min = HEADER_BYTES + PALETTE_SIZE * 3;
        if bytes.len() < min {
            return Err(LevelError::TooShort {
                actual: bytes.len(),
                min,
            });
        }

        let gravity = read_u16_le(bytes, 0);
        let fuel = read_u16_le(bytes, 2);
        let oxygen = read_u16_le(bytes, 4);
        let colors = bytes[HEADER_BYTES..min]
            .chunks_exact(3)
            .map(|c| Color::from_vga(c[0], c[1], c[2]))
            .collect();

        let level = Self::from_cell_bytes(name, gravity, fuel, oxygen, colors, &bytes[min..])?;
        log::info!(
            "Loaded level '{}' (length {}, gravity {}, fuel {}, oxygen {})",
            level.name,
            level.length(),
            level.gravity,
            level.fuel,
            level.oxygen
        );
        Ok(level)
    }

    /// Cell under world position; the empty sentinel outside the grid
    pub fn cell(&self, x: f64, _y: f64, z: f64) -> &Cell {
        let x = x - GRID_LEFT;
        if !(0.0..=GRID_SPAN).contains(&x) {
            return &EMPTY_CELL;
        }

        let z = ((z * 8.0).floor() / 8.0).floor();
        if z < 0.0 {
            return &EMPTY_CELL;
        }
        let col = (x / CELL_WIDTH).floor() as usize;

        self.cells
            .get(col)
            .and_then(|column| column.get(z as usize))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Cell by grid coordinates
    pub fn cell_at(&self, column: usize, row: usize) -> &Cell {
        self.cells
            .get(column)
            .and_then(|c| c.get(row))
            .unwrap_or(&EMPTY_CELL)
    }

    pub fn width(&self) -> usize {
        self.cells.len()
    }

    /// Number of rows along z
    pub fn length(&self) -> usize {
        self.cells.first().map_or(0, Vec::len)
    }

    /// Per-tick vertical acceleration for this level's gravity
    pub fn gravity_acceleration(&self) -> f64 {
        -(self.gravity as f64 * 0x1680 as f64 / 0x190 as f64).floor() / 0x80 as f64
    }

    /// Whether the position collides with solid tile, cube or tunnel geometry
    pub fn is_inside_tile(&self, x: f64, y: f64, z: f64) -> bool {
        if !self.is_supported(x, y, z) {
            return false;
        }
        if y < FLOOR_HEIGHT && y > LOW_CORRIDOR_FLOOR {
            return true;
        }
        if y < SOLID_FLOOR_MIN {
            return false;
        }
        self.probe_columns(x, y, z, is_inside_tile_y)
    }

    /// Whether the position lies in a tunnel's floor (used for the finish check)
    pub fn is_inside_tunnel(&self, x: f64, y: f64, z: f64) -> bool {
        self.is_supported(x, y, z) && self.probe_columns(x, y, z, is_inside_tunnel_y)
    }

    fn is_supported(&self, x: f64, y: f64, z: f64) -> bool {
        !self.cell(x - SHIP_HALF_WIDTH, y, z).is_empty()
            || !self.cell(x + SHIP_HALF_WIDTH, y, z).is_empty()
    }

    fn probe_columns(&self, x: f64, y: f64, z: f64, test: fn(f64, f64, &Cell) -> bool) -> bool {
        let (dist, neighbour) = distance_from_center(x);
        test(y, dist, self.cell(x, y, z))
            || test(y, 47.0 - dist, self.cell(x + neighbour, y, z))
    }

    fn color(&self, index: usize) -> Color {
        self.colors.get(index).copied().unwrap_or_default()
    }

    /// Tunnel ring colours (palette 66..72, reversed)
    pub fn tunnel_colors(&self) -> Vec<Color> {
        (66..72).rev().map(|i| self.color(i)).collect()
    }

    pub fn tile_colors(&self, index: u8) -> CubeColors {
        let i = index as usize;
        CubeColors {
            left: self.color(i + 45),
            right: self.color(i + 30),
            top: self.color(i),
            front: self.color(i + 15),
        }
    }

    /// Cube colours, optionally with a coloured top face
    pub fn cube_colors(&self, top_index: u8) -> CubeColors {
        let top = if top_index > 0 { top_index as usize } else { 61 };
        CubeColors {
            left: self.color(64),
            right: self.color(63),
            top: self.color(top),
            front: self.color(62),
        }
    }
}

/// Location of one level inside the level archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelEntry {
    /// Byte offset of the level header
    pub start: u16,
    /// Decompressed cell data size
    pub size: u16,
}

/// Parse the archive index: `(start, size)` pairs up to the first level's start.
/// Entry 0 is the demo level.
pub fn parse_level_index(bytes: &[u8]) -> Result<Vec<LevelEntry>, LevelError> {
    let mut entries = Vec::new();
    let mut offset = 0;
    loop {
        if offset + 4 > bytes.len() {
            return Err(LevelError::IndexTruncated { offset });
        }
        entries.push(LevelEntry {
            start: read_u16_le(bytes, offset),
            size: read_u16_le(bytes, offset + 2),
        });
        offset += 4;

        if offset >= entries[0].start as usize {
            break;
        }
    }
    Ok(entries)
}

fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn level_of(cell: (u8, u8), length: usize, gravity: u16) -> Level {
        let bytes: Vec<u8> = (0..length * LEVEL_WIDTH)
            .flat_map(|_| [cell.0, cell.1])
            .collect();
        Level::from_cell_bytes("test", gravity, 100, 100, Vec::new(), &bytes).unwrap()
    }

    #[test]
    fn test_touch_effect_nibbles() {
        assert_eq!(TouchEffect::from_color_index(10), TouchEffect::Accelerate);
        assert_eq!(TouchEffect::from_color_index(12), TouchEffect::Kill);
        assert_eq!(TouchEffect::from_color_index(9), TouchEffect::RefillOxygen);
        assert_eq!(TouchEffect::from_color_index(8), TouchEffect::Slide);
        assert_eq!(TouchEffect::from_color_index(2), TouchEffect::Decelerate);
        assert_eq!(TouchEffect::from_color_index(1), TouchEffect::None);
    }

    #[test]
    fn test_cell_from_raw() {
        let cell = Cell::from_raw(0xC1, 0x03);
        assert!(cell.tunnel);
        let tile = cell.tile.unwrap();
        assert_eq!(tile.effect, TouchEffect::None);
        let cube = cell.cube.unwrap();
        assert_eq!(cube.height, Some(100.0));
        assert_eq!(cube.effect, TouchEffect::Kill);

        assert_eq!(Cube::height_for_flags(4), Some(120.0));
        assert_eq!(Cube::height_for_flags(6), None);
        assert!(Cell::from_raw(0, 0).is_empty());
        assert!(Cell::from_raw(0xA0, 0).tile.is_none());
    }

    #[test]
    fn test_cell_lookup_bounds() {
        let level = level_of((0x01, 0), 10, 8);
        assert!(!level.cell(256.0, 80.0, 3.0).is_empty());
        assert!(level.cell(94.9, 80.0, 3.0).is_empty());
        assert!(level.cell(417.1, 80.0, 3.0).is_empty());
        assert!(level.cell(256.0, 80.0, 10.0).is_empty());
        assert!(level.cell(256.0, 80.0, -0.5).is_empty());
        // Right edge maps past the last column
        assert!(level.cell(417.0, 80.0, 3.0).is_empty());
    }

    #[test]
    fn test_gravity_acceleration() {
        let level = level_of((0x01, 0), 1, 10);
        assert_eq!(level.gravity_acceleration(), -144.0 / 128.0);
        let level = level_of((0x01, 0), 1, 7);
        // floor(7 * 5760 / 400) = floor(100.8)
        assert_eq!(level.gravity_acceleration(), -100.0 / 128.0);
    }

    #[test]
    fn test_floor_band_is_solid() {
        let level = level_of((0x01, 0), 10, 8);
        assert!(level.is_inside_tile(256.0, 79.9, 3.0));
        assert!(level.is_inside_tile(256.0, 62.0, 3.0));
        assert!(!level.is_inside_tile(256.0, 80.0, 3.0));
        assert!(!level.is_inside_tile(256.0, 61.0, 3.0));
        assert!(!level.is_inside_tile(256.0, 50.0, 3.0));
    }

    #[test]
    fn test_cube_blocks_below_its_top() {
        let level = level_of((0x01, 0x02), 10, 8);
        assert!(level.is_inside_tile(256.0, 90.0, 3.0));
        assert!(level.is_inside_tile(256.0, 99.9, 3.0));
        assert!(!level.is_inside_tile(256.0, 100.0, 3.0));
    }

    #[test]
    fn test_tunnel_walls() {
        let level = level_of((0x01, 0x01), 10, 8);
        // Column centre: the ring wall spans 16 < y - 68 < 32
        assert!(!level.is_inside_tile(256.0, 80.0, 3.0));
        assert!(level.is_inside_tile(256.0, 88.0, 3.0));
        assert!(!level.is_inside_tile(256.0, 100.0, 3.0));
        assert!(level.is_inside_tile(256.0, 99.0, 3.0));
    }

    #[test]
    fn test_tunnel_floor_check() {
        let tunnel = level_of((0x01, 0x01), 10, 8);
        assert!(tunnel.is_inside_tunnel(256.0, 80.0, 9.6));
        assert!(!tunnel.is_inside_tunnel(256.0, 79.0, 9.6));
        let open = level_of((0x01, 0x00), 10, 8);
        assert!(!open.is_inside_tunnel(256.0, 80.0, 9.6));
    }

    #[test]
    fn test_distance_from_center_at_column_centre() {
        // Column 3 spans [233, 279); its centre is 256
        assert_eq!(distance_from_center(256.0), (0.0, -46.0));
        let (d, n) = distance_from_center(72.0);
        assert_eq!((d, n), (0.0, -46.0));
        let (d, n) = distance_from_center(73.0);
        assert_eq!((d, n), (2.0, 46.0));
    }

    #[test]
    fn test_from_decoded_header_and_palette() {
        let mut bytes = vec![10, 0, 100, 0, 0x2C, 0x01];
        for i in 0..PALETTE_SIZE {
            bytes.extend_from_slice(&[i as u8 % 64, 1, 2]);
        }
        for z in 0..3u8 {
            for _ in 0..LEVEL_WIDTH {
                bytes.extend_from_slice(&[if z == 1 { 0x0C } else { 0x01 }, 0]);
            }
        }

        let level = Level::from_decoded("Level 1", &bytes).unwrap();
        assert_eq!(level.gravity, 10);
        assert_eq!(level.fuel, 100);
        assert_eq!(level.oxygen, 300);
        assert_eq!(level.length(), 3);
        assert_eq!(level.width(), LEVEL_WIDTH);
        assert_eq!(level.colors[5], Color::from_vga(5, 1, 2));
        assert_eq!(
            level.cell_at(2, 1).tile.map(|t| t.effect),
            Some(TouchEffect::Kill)
        );
        assert_eq!(level.tunnel_colors()[0], level.colors[71]);
        assert_eq!(level.cube_colors(0).top, level.colors[61]);
        assert_eq!(level.tile_colors(3).left, level.colors[48]);
    }

    #[test]
    fn test_from_decoded_rejects_bad_data() {
        assert!(matches!(
            Level::from_decoded("x", &[0; 10]),
            Err(LevelError::TooShort { .. })
        ));
        let mut bytes = vec![0; HEADER_BYTES + PALETTE_SIZE * 3];
        bytes.extend_from_slice(&[1, 0, 1]);
        assert!(matches!(
            Level::from_decoded("x", &bytes),
            Err(LevelError::RaggedCells { .. })
        ));
    }

    #[test]
    fn test_parse_level_index() {
        let bytes = [12, 0, 140, 0, 50, 1, 28, 0, 80, 2, 42, 0];
        let entries = parse_level_index(&bytes).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], LevelEntry { start: 12, size: 140 });
        assert_eq!(entries[2], LevelEntry { start: 0x250, size: 42 });
        assert!(parse_level_index(&[12, 0, 140]).is_err());
    }

    proptest! {
        #[test]
        fn prop_tile_collision_repeats_every_column(
            xi in (187 * 128)..(279 * 128),
            yi in (60 * 128)..(140 * 128),
            zi in 0u32..(8 * 65536),
            flags in prop::sample::select(vec![0u8, 1, 2, 3, 4]),
        ) {
            let level = level_of((0x01, flags), 10, 8);
            let x = xi as f64 / 128.0;
            let y = yi as f64 / 128.0;
            let z = zi as f64 / 65536.0;
            prop_assert_eq!(distance_from_center(x), distance_from_center(x + CELL_WIDTH));
            prop_assert_eq!(
                level.is_inside_tile(x, y, z),
                level.is_inside_tile(x + CELL_WIDTH, y, z)
            );
        }
    }
}
