//! The terminal state engine behind every pty: a [vt100::Parser] holding the
//! authoritative grid, plus a [VteActionParser] running alongside it to
//! notice when the child's output is about to scroll the screen.

use crate::rect_set::RectSet;
use crate::vte_actions::{VteAction, VteActionParser};
use unicode_width::UnicodeWidthChar;

/// Index of the alternate grid in [TermState]'s margins.
const ALTERNATE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    /// Contents move up; lines leave at the top margin.
    Up,
    /// Contents move down; lines leave at the bottom margin.
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollEvent {
    pub direction: ScrollDirection,
    pub lines: u16,
    /// Top margin, 0-based.
    pub top: u16,
    /// Bottom margin, 0-based and inclusive.
    pub bottom: u16,
    /// Text of the lines about to be pushed out of the scroll region.
    pub departing: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollPhase {
    Pre,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CellKey {
    contents: String,
    fg: vt100::Color,
    bg: vt100::Color,
    bold: bool,
    italic: bool,
    underline: bool,
    inverse: bool,
}

impl CellKey {
    fn of(cell: Option<&vt100::Cell>) -> Self {
        match cell {
            Some(cell) => Self {
                contents: cell.contents(),
                fg: cell.fgcolor(),
                bg: cell.bgcolor(),
                bold: cell.bold(),
                italic: cell.italic(),
                underline: cell.underline(),
                inverse: cell.inverse(),
            },
            None => Self {
                contents: String::new(),
                fg: vt100::Color::Default,
                bg: vt100::Color::Default,
                bold: false,
                italic: false,
                underline: false,
                inverse: false,
            },
        }
    }
}

pub struct TermState {
    parser: vt100::Parser,
    scanner: VteActionParser,
    /// Scroll region of the primary and alternate grid, as 0-based inclusive
    /// rows. `None` is the whole screen. Kept in step with vt100, which
    /// gives each grid its own region.
    margins: [Option<(u16, u16)>; 2],
    /// What the cells looked like the last time damage was taken.
    shown: Vec<CellKey>,
    shown_size: (u16, u16),
}

impl TermState {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            parser: vt100::Parser::new(rows, cols, 0),
            scanner: VteActionParser::new(),
            margins: [None; 2],
            shown: Vec::new(),
            shown_size: (0, 0),
        }
    }

    /// `(rows, cols)`
    pub fn size(&self) -> (u16, u16) {
        self.parser.screen().size()
    }

    pub fn screen(&self) -> &vt100::Screen {
        self.parser.screen()
    }

    /// `(row, col)`
    pub fn cursor(&self) -> (u16, u16) {
        self.parser.screen().cursor_position()
    }

    pub fn cursor_hidden(&self) -> bool {
        self.parser.screen().hide_cursor()
    }

    pub fn cell(&self, row: u16, col: u16) -> Option<&vt100::Cell> {
        self.parser.screen().cell(row, col)
    }

    /// Feed child output. `on_scroll` hears about every scroll right before
    /// and right after the terminal state performs it.
    pub fn process(&mut self, bytes: &[u8], on_scroll: &mut dyn FnMut(ScrollPhase, &ScrollEvent)) {
        let mut start = 0;
        for (i, byte) in bytes.iter().enumerate() {
            let Some(action) = self.scanner.advance(*byte) else {
                continue;
            };
            self.parser.process(&bytes[start..i]);

            let event = self.scroll_for(action);
            if let Some(event) = &event {
                on_scroll(ScrollPhase::Pre, event);
            }
            self.parser.process(&bytes[i..=i]);
            start = i + 1;

            match action {
                VteAction::SetScrollRegion(top, bottom) => self.set_margins(top, bottom),
                VteAction::ResetScrollRegion => self.set_margins(1, 0),
                VteAction::Reset => self.margins = [None; 2],
                VteAction::AlternateScreen { cleared: true } => self.margins[ALTERNATE] = None,
                _ => {}
            }
            if let Some(event) = &event {
                on_scroll(ScrollPhase::Post, event);
            }
        }
        self.parser.process(&bytes[start..]);
    }

    /// Resize the grid. The next [TermState::take_damage] reports every cell.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        let old_rows = self.size().0;
        self.parser.set_size(rows, cols);
        for margins in &mut self.margins {
            *margins = resized_margins(*margins, old_rows, rows);
        }
        self.invalidate();
    }

    /// Forget what was shown so the next damage pass covers the whole grid.
    pub fn invalidate(&mut self) {
        self.shown.clear();
        self.shown_size = (0, 0);
    }

    /// Turn on every cell in `damage` that changed since the last call.
    pub fn take_damage(&mut self, damage: &mut RectSet) {
        let (rows, cols) = self.size();
        let screen = self.parser.screen();

        if self.shown_size != (rows, cols) {
            self.shown = (0..rows)
                .flat_map(|row| (0..cols).map(move |col| (row, col)))
                .map(|(row, col)| CellKey::of(screen.cell(row, col)))
                .collect();
            self.shown_size = (rows, cols);
            damage.add_all();
            return;
        }

        for row in 0..rows {
            for col in 0..cols {
                let current = CellKey::of(screen.cell(row, col));
                let idx = usize::from(row) * usize::from(cols) + usize::from(col);
                if self.shown[idx] != current {
                    self.shown[idx] = current;
                    let (row, col) = (usize::from(row), usize::from(col));
                    damage.add(col..col + 1, row..row + 1);
                }
            }
        }
    }

    fn grid(&self) -> usize {
        usize::from(self.parser.screen().alternate_screen())
    }

    /// Mirror DECSTBM on the active grid: the bottom is clamped to the
    /// screen, and a region under two lines means the whole screen.
    fn set_margins(&mut self, top: u16, bottom: u16) {
        let rows = self.size().0;
        if rows == 0 {
            return;
        }
        let bottom = if bottom == 0 { rows } else { bottom.min(rows) };
        let (top, bottom) = (top.max(1) - 1, bottom - 1);
        let grid = self.grid();
        self.margins[grid] = if top < bottom && (top, bottom) != (0, rows - 1) {
            Some((top, bottom))
        } else {
            None
        };
    }

    fn scroll_for(&self, action: VteAction) -> Option<ScrollEvent> {
        let rows = self.size().0;
        if rows == 0 {
            return None;
        }
        let (top, bottom) = self.margins[self.grid()].unwrap_or((0, rows - 1));
        let height = bottom - top + 1;
        let (row, col) = self.cursor();
        let cols = self.size().1;

        let (direction, lines) = match action {
            VteAction::LineFeed if row == bottom => (ScrollDirection::Up, 1),
            VteAction::Print(c) if row == bottom && wraps(c, col, cols) => (ScrollDirection::Up, 1),
            VteAction::ReverseIndex if row == top => (ScrollDirection::Down, 1),
            VteAction::ScrollUp(n) => (ScrollDirection::Up, n.min(height)),
            VteAction::ScrollDown(n) => (ScrollDirection::Down, n.min(height)),
            _ => return None,
        };

        let first = match direction {
            ScrollDirection::Up => top,
            ScrollDirection::Down => bottom + 1 - lines,
        };
        let departing = self
            .parser
            .screen()
            .rows(0, cols)
            .skip(usize::from(first))
            .take(usize::from(lines))
            .map(|line| line.trim_end().to_string())
            .collect();

        Some(ScrollEvent {
            direction,
            lines,
            top,
            bottom,
            departing,
        })
    }
}

/// Whether printing `c` with the cursor at `col` first wraps onto the next
/// line. vt100 wraps whenever the character does not fit, so a cursor left
/// past the last column wraps on the next printable character.
fn wraps(c: char, col: u16, cols: u16) -> bool {
    let width = match c.width() {
        Some(width) => width,
        // vt100 drops these without drawing.
        None if u32::from(c) < 256 => return false,
        None => 1,
    };
    let width = u16::try_from(width).unwrap_or(1);
    width > 0 && col.saturating_add(width) > cols
}

/// Follow vt100's resize of a scroll region: a bottom on the last row stays
/// on the last row, anything else is clamped into the new height.
fn resized_margins(margins: Option<(u16, u16)>, old_rows: u16, rows: u16) -> Option<(u16, u16)> {
    let (top, bottom) = margins?;
    let last = rows.checked_sub(1)?;
    let bottom = if bottom + 1 == old_rows { last } else { bottom.min(last) };
    let top = if bottom < top { 0 } else { top };
    Some((top, bottom)).filter(|&margins| margins != (0, last))
}
