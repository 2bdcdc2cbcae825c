//! Translation from the terminal state's color model into the screen's color
//! pairs.
//!
//! A pair packs a foreground and a background drawn from `-1` (the terminal's
//! default) and the eight base ANSI colors: `pair = (fg + 1) * 9 + (bg + 1)`.
//! Pair 0 is therefore always default-on-default. The bright half of the ANSI
//! palette has no slot of its own; it reuses the base color and sets bold.

use crossterm::style::Color;

/// Number of distinct pairs, `0..PAIR_COUNT`.
pub const PAIR_COUNT: u8 = 81;

/// xterm's defaults for the 16 ANSI colors.
const REFERENCE: [(u8, u8, u8); 16] = [
    (0, 0, 0),
    (205, 0, 0),
    (0, 205, 0),
    (205, 205, 0),
    (0, 0, 238),
    (205, 0, 205),
    (0, 205, 205),
    (229, 229, 229),
    (127, 127, 127),
    (255, 0, 0),
    (0, 255, 0),
    (255, 255, 0),
    (92, 92, 255),
    (255, 0, 255),
    (0, 255, 255),
    (255, 255, 255),
];

/// A base color in `-1..=7` and whether it came from the bright half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Base {
    pub index: i8,
    pub bright: bool,
}

impl Base {
    pub const DEFAULT: Base = Base {
        index: -1,
        bright: false,
    };
}

/// The resolved colors for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellColors {
    pub pair: u8,
    /// Set when the foreground came from the bright half of the palette.
    pub bold: bool,
}

pub fn pair_index(fg: i8, bg: i8) -> u8 {
    debug_assert!((-1..=7).contains(&fg) && (-1..=7).contains(&bg));
    ((fg + 1) * 9 + (bg + 1)) as u8
}

/// Inverse of [pair_index].
pub fn pair_colors(pair: u8) -> (i8, i8) {
    let pair = pair.min(PAIR_COUNT - 1) as i8;
    (pair / 9 - 1, pair % 9 - 1)
}

/// Reduce a vt100 color to a base color, falling back to the nearest ANSI
/// reference color for anything outside the 16-color palette.
pub fn base_color(color: vt100::Color) -> Base {
    match color {
        vt100::Color::Default => Base::DEFAULT,
        vt100::Color::Idx(idx) if idx < 8 => Base {
            index: idx as i8,
            bright: false,
        },
        vt100::Color::Idx(idx) if idx < 16 => Base {
            index: idx as i8 - 8,
            bright: true,
        },
        vt100::Color::Idx(idx) => {
            let rgb = xterm_rgb(idx);
            let nearest = nearest_ansi(rgb);
            log::debug!("no exact color for index {idx}, using nearest ANSI color {nearest}");
            from_ansi16(nearest)
        }
        vt100::Color::Rgb(r, g, b) => {
            let nearest = nearest_ansi((r, g, b));
            log::debug!("no exact color for #{r:02x}{g:02x}{b:02x}, using nearest ANSI color {nearest}");
            from_ansi16(nearest)
        }
    }
}

/// Resolve a cell's foreground and background into a pair.
pub fn cell_colors(fg: vt100::Color, bg: vt100::Color, color_enabled: bool) -> CellColors {
    if !color_enabled {
        return CellColors::default();
    }
    let fg = base_color(fg);
    let bg = base_color(bg);
    CellColors {
        pair: pair_index(fg.index, bg.index),
        bold: fg.bright,
    }
}

/// Index into the 16 reference colors closest to `rgb` by squared distance.
pub fn nearest_ansi(rgb: (u8, u8, u8)) -> u8 {
    let distance = |reference: &(u8, u8, u8)| {
        let dr = i32::from(rgb.0) - i32::from(reference.0);
        let dg = i32::from(rgb.1) - i32::from(reference.1);
        let db = i32::from(rgb.2) - i32::from(reference.2);
        dr * dr + dg * dg + db * db
    };
    REFERENCE
        .iter()
        .enumerate()
        .min_by_key(|(_, reference)| distance(reference))
        .map(|(idx, _)| idx as u8)
        .unwrap_or(0)
}

/// The screen color for a base index.
pub fn screen_color(index: i8) -> Color {
    match index {
        0 => Color::Black,
        1 => Color::DarkRed,
        2 => Color::DarkGreen,
        3 => Color::DarkYellow,
        4 => Color::DarkBlue,
        5 => Color::DarkMagenta,
        6 => Color::DarkCyan,
        7 => Color::Grey,
        _ => Color::Reset,
    }
}

fn from_ansi16(idx: u8) -> Base {
    Base {
        index: (idx % 8) as i8,
        bright: idx >= 8,
    }
}

/// RGB value of an entry in the xterm 256-color palette.
fn xterm_rgb(idx: u8) -> (u8, u8, u8) {
    match idx {
        0..=15 => REFERENCE[idx as usize],
        16..=231 => {
            let idx = idx - 16;
            let level = |v: u8| if v == 0 { 0 } else { 55 + v * 40 };
            (level(idx / 36), level((idx / 6) % 6), level(idx % 6))
        }
        _ => {
            let grey = 8 + (idx - 232) * 10;
            (grey, grey, grey)
        }
    }
}
