use anyhow::Result;
use std::ops::Range;

use crate::color;
use crate::layout::Region;
use crate::plugin::{CellUpdate, Chain, CursorMove, Event};
use crate::rect_set::RectSet;
use crate::screen::{Screen, Style};
use crate::term_state::TermState;

/// Screen-wide facts a window needs while painting.
#[derive(Debug, Clone, Copy)]
pub struct Paint<'a> {
    pub color: bool,
    /// Absolute regions drawn over this window (overlay panels). Cells under
    /// them are left alone.
    pub covered: &'a [Region],
}

/// Keeps one terminal's state in sync with its region of the screen.
///
/// Damage is buffered in a [RectSet] and only drawn on [TermWin::flush]. A
/// window without a region is unallocated: it swallows damage and draws
/// nothing.
#[derive(Debug)]
pub struct TermWin {
    region: Option<Region>,
    damage: RectSet,
    /// Relative `(row, col)`.
    cursor: (u16, u16),
    /// Whether this window positions the physical cursor.
    owns_cursor: bool,
}

impl TermWin {
    pub fn new(region: Option<Region>, owns_cursor: bool) -> Self {
        let region = region.filter(Region::is_allocated);
        Self {
            damage: damage_for(region),
            region,
            cursor: (0, 0),
            owns_cursor,
        }
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }

    pub fn cursor(&self) -> (u16, u16) {
        self.cursor
    }

    /// The cursor in absolute screen coordinates.
    pub fn screen_cursor(&self) -> Option<(u16, u16)> {
        self.region
            .map(|region| (region.y + self.cursor.0, region.x + self.cursor.1))
    }

    pub fn owns_cursor(&self) -> bool {
        self.owns_cursor
    }

    pub fn has_damage(&self) -> bool {
        !self.damage.is_empty()
    }

    pub fn defer_damage(&mut self, cols: Range<usize>, rows: Range<usize>) {
        self.damage.add(cols, rows);
    }

    /// Damage every cell of the window.
    pub fn damage_all(&mut self) {
        self.damage.add_all();
    }

    /// Damage the part of the window under the absolute region `area`.
    pub fn damage_area(&mut self, area: Region) {
        let Some(region) = self.region else {
            return;
        };
        if let Some(overlap) = region.intersect(&area) {
            let col = usize::from(overlap.x - region.x);
            let row = usize::from(overlap.y - region.y);
            self.damage.add(
                col..col + usize::from(overlap.cols),
                row..row + usize::from(overlap.rows),
            );
        }
    }

    /// Draw every damaged cell, running each through the cell_update chain.
    pub fn flush(
        &mut self,
        term: &TermState,
        screen: &mut dyn Screen,
        chain: &Chain,
        paint: Paint<'_>,
    ) -> Result<()> {
        let Some(region) = self.region else {
            self.damage.clear();
            return Ok(());
        };
        if self.damage.is_empty() {
            return Ok(());
        }

        for rect in self.damage.drain() {
            for row in rect.rows() {
                for col in rect.cols() {
                    let (row, col) = (row as u16, col as u16);
                    let (y, x) = (region.y + row, region.x + col);
                    if paint.covered.iter().any(|over| over.contains(y, x)) {
                        continue;
                    }
                    let Some(update) = cell_update(term, row, col, paint.color) else {
                        continue;
                    };
                    if let Some(Event::CellUpdate(update)) = chain.dispatch(Event::CellUpdate(update)) {
                        if update.row < region.rows && update.col < region.cols {
                            screen.draw(
                                region.y + update.row,
                                region.x + update.col,
                                &update.text,
                                update.style,
                            )?;
                        }
                    }
                }
            }
        }

        if self.owns_cursor {
            screen.move_cursor(region.y + self.cursor.0, region.x + self.cursor.1)?;
        }
        Ok(())
    }

    /// Move the cursor to `(row, col)` relative to the window. Targets outside
    /// the window are ignored. Pending damage is flushed first so it can never
    /// land on top of the freshly moved cursor. Returns whether it moved.
    pub fn move_cursor(
        &mut self,
        row: u16,
        col: u16,
        chain: Option<&Chain>,
        term: &TermState,
        screen: &mut dyn Screen,
        paint: Paint<'_>,
    ) -> Result<bool> {
        let Some(region) = self.region else {
            return Ok(false);
        };
        if row >= region.rows || col >= region.cols {
            return Ok(false);
        }

        let mut to = (row, col);
        if let Some(chain) = chain {
            let event = Event::CursorMove(CursorMove {
                from: self.cursor,
                to,
            });
            match chain.dispatch(event) {
                Some(Event::CursorMove(moved)) if moved.to.0 < region.rows && moved.to.1 < region.cols => {
                    to = moved.to
                }
                _ => return Ok(false),
            }
        }

        self.flush(term, screen, chain.unwrap_or(&Chain::empty()), paint)?;
        self.cursor = to;
        if self.owns_cursor {
            screen.move_cursor(region.y + to.0, region.x + to.1)?;
        }
        Ok(true)
    }

    /// Pull new damage and the cursor from `term` and draw them.
    pub fn sync(
        &mut self,
        term: &mut TermState,
        screen: &mut dyn Screen,
        chain: &Chain,
        paint: Paint<'_>,
    ) -> Result<()> {
        if self.region.is_none() {
            return Ok(());
        }
        term.take_damage(&mut self.damage);
        let (row, col) = term.cursor();
        if (row, col) != self.cursor {
            self.move_cursor(row, col, Some(chain), term, screen, paint)?;
        }
        self.flush(term, screen, chain, paint)?;
        if self.owns_cursor {
            screen.show_cursor(!term.cursor_hidden())?;
        }
        Ok(())
    }

    /// Give the window a new region. The damage set is rebuilt for the new
    /// size and `term` is resized to match, which damages everything.
    pub fn resize(&mut self, region: Option<Region>, term: &mut TermState) {
        let region = region.filter(Region::is_allocated);
        self.region = region;
        self.damage = damage_for(region);
        if let Some(region) = region {
            term.resize(region.rows, region.cols);
            self.cursor = (
                self.cursor.0.min(region.rows - 1),
                self.cursor.1.min(region.cols - 1),
            );
        }
    }
}

fn damage_for(region: Option<Region>) -> RectSet {
    match region {
        Some(region) => RectSet::new(usize::from(region.rows), usize::from(region.cols)),
        None => RectSet::new(0, 0),
    }
}

/// Convert one terminal cell into what the screen should draw.
fn cell_update(term: &TermState, row: u16, col: u16, color_enabled: bool) -> Option<CellUpdate> {
    let Some(cell) = term.cell(row, col) else {
        return Some(CellUpdate {
            row,
            col,
            text: " ".to_string(),
            style: Style::default(),
        });
    };
    if cell.is_wide_continuation() {
        return None;
    }
    let colors = color::cell_colors(cell.fgcolor(), cell.bgcolor(), color_enabled);
    let text = if cell.has_contents() {
        cell.contents()
    } else {
        " ".to_string()
    };
    Some(CellUpdate {
        row,
        col,
        text,
        style: Style {
            pair: colors.pair,
            bold: cell.bold() || colors.bold,
            italic: cell.italic(),
            underline: cell.underline(),
            inverse: cell.inverse(),
        },
    })
}

#[cfg(test)]
mod test {
    use super::{Paint, TermWin};
    use crate::color;
    use crate::layout::Region;
    use crate::plugin::{Callbacks, Chain, Event, EventKind, Outcome};
    use crate::screen::GridScreen;
    use crate::term_state::TermState;
    use std::sync::Arc;

    const PAINT: Paint<'static> = Paint {
        color: true,
        covered: &[],
    };

    fn feed(term: &mut TermState, bytes: &[u8]) {
        term.process(bytes, &mut |_, _| {});
    }

    #[test]
    fn unallocated_window_draws_nothing() {
        let mut term = TermState::new(2, 2);
        let mut screen = GridScreen::new(5, 5);
        let mut win = TermWin::new(None, true);
        win.defer_damage(0..2, 0..2);
        win.flush(&term, &mut screen, &Chain::empty(), PAINT).unwrap();
        win.sync(&mut term, &mut screen, &Chain::empty(), PAINT).unwrap();
        assert_eq!(screen.draws, 0);
        assert!(!win.has_damage());
    }

    #[test]
    fn flush_draws_offset_by_region() {
        let mut term = TermState::new(2, 4);
        feed(&mut term, b"ab");
        let mut screen = GridScreen::new(6, 10);
        let mut win = TermWin::new(Some(Region::new(3, 5, 2, 4)), true);
        win.defer_damage(0..2, 0..1);
        win.flush(&term, &mut screen, &Chain::empty(), PAINT).unwrap();
        assert_eq!(screen.text_at(3, 5), Some("a"));
        assert_eq!(screen.text_at(3, 6), Some("b"));
        assert_eq!(screen.draws, 2);
        // Cursor is restored to the window's cursor afterwards.
        assert_eq!(screen.cursor, (3, 5));
    }

    #[test]
    fn colors_are_mapped_to_pairs() {
        let mut term = TermState::new(1, 2);
        feed(&mut term, b"\x1b[31;44mx\x1b[91my");
        let mut screen = GridScreen::new(1, 2);
        let mut win = TermWin::new(Some(Region::new(0, 0, 1, 2)), true);
        win.damage_all();
        win.flush(&term, &mut screen, &Chain::empty(), PAINT).unwrap();
        let (_, first) = &screen.cells[&(0, 0)];
        let (_, second) = &screen.cells[&(0, 1)];
        assert_eq!(first.pair, color::pair_index(1, 4));
        assert!(!first.bold);
        assert_eq!(second.pair, color::pair_index(1, 4));
        assert!(second.bold);
    }

    #[test]
    fn cancelled_cells_are_not_drawn() {
        let mut term = TermState::new(1, 3);
        feed(&mut term, b"abc");
        let skip_b = Callbacks::new().on(EventKind::CellUpdate, |event| {
            if matches!(&event, Event::CellUpdate(cell) if cell.text == "b") {
                Outcome::Cancel
            } else {
                Outcome::Continue(event)
            }
        });
        let chain = Chain::new(vec![Arc::new(skip_b)]);
        let mut screen = GridScreen::new(1, 3);
        let mut win = TermWin::new(Some(Region::new(0, 0, 1, 3)), true);
        win.damage_all();
        win.flush(&term, &mut screen, &chain, PAINT).unwrap();
        assert_eq!(screen.row(0), "a~c");
    }

    #[test]
    fn covered_cells_are_skipped() {
        let term = TermState::new(1, 4);
        let mut screen = GridScreen::new(1, 4);
        let mut win = TermWin::new(Some(Region::new(0, 0, 1, 4)), true);
        win.damage_all();
        let covered = [Region::new(0, 1, 1, 2)];
        let paint = Paint {
            color: true,
            covered: &covered,
        };
        win.flush(&term, &mut screen, &Chain::empty(), paint).unwrap();
        assert_eq!(screen.row(0), " ~~ ");
    }

    #[test]
    fn move_cursor_ignores_out_of_bounds() {
        let term = TermState::new(2, 2);
        let mut screen = GridScreen::new(2, 2);
        let mut win = TermWin::new(Some(Region::new(0, 0, 2, 2)), true);
        assert!(!win.move_cursor(2, 0, None, &term, &mut screen, PAINT).unwrap());
        assert!(win.move_cursor(1, 1, None, &term, &mut screen, PAINT).unwrap());
        assert_eq!(win.cursor(), (1, 1));
        assert_eq!(screen.cursor, (1, 1));
    }

    #[test]
    fn move_cursor_flushes_damage_first() {
        let mut term = TermState::new(1, 3);
        feed(&mut term, b"xyz");
        let mut screen = GridScreen::new(1, 3);
        let mut win = TermWin::new(Some(Region::new(0, 0, 1, 3)), true);
        win.damage_all();
        win.move_cursor(0, 2, None, &term, &mut screen, PAINT).unwrap();
        assert!(!win.has_damage());
        assert_eq!(screen.row(0), "xyz");
        assert_eq!(screen.cursor, (0, 2));
    }

    #[test]
    fn cancelled_cursor_move_stays_put() {
        let term = TermState::new(3, 3);
        let mut screen = GridScreen::new(3, 3);
        let mut win = TermWin::new(Some(Region::new(0, 0, 3, 3)), true);
        let pin = Callbacks::new().on(EventKind::CursorMove, |_| Outcome::Cancel);
        let chain = Chain::new(vec![Arc::new(pin)]);
        assert!(!win.move_cursor(2, 2, Some(&chain), &term, &mut screen, PAINT).unwrap());
        assert_eq!(win.cursor(), (0, 0));
    }

    #[test]
    fn sync_follows_terminal_cursor() {
        let mut term = TermState::new(2, 5);
        let mut screen = GridScreen::new(2, 5);
        let mut win = TermWin::new(Some(Region::new(0, 0, 2, 5)), true);
        feed(&mut term, b"hey\r\nyo");
        win.sync(&mut term, &mut screen, &Chain::empty(), PAINT).unwrap();
        assert_eq!(screen.row(0), "hey  ");
        assert_eq!(screen.row(1), "yo   ");
        assert_eq!(win.cursor(), (1, 2));
        assert_eq!(screen.cursor, (1, 2));
    }

    #[test]
    fn resize_rebuilds_damage_and_terminal() {
        let mut term = TermState::new(2, 2);
        let mut win = TermWin::new(Some(Region::new(0, 0, 2, 2)), true);
        win.resize(Some(Region::new(1, 1, 4, 6)), &mut term);
        assert_eq!(term.size(), (4, 6));
        assert!(!win.has_damage());
        win.resize(Some(Region::EMPTY), &mut term);
        assert_eq!(win.region(), None);
        assert_eq!(term.size(), (4, 6));
    }
}
