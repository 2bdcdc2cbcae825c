use anyhow::Result;
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::queue;
use crossterm::style::{Attribute, Colors, Print, SetAttribute, SetColors};
use crossterm::terminal::{Clear, ClearType};
use std::io::Write;

use crate::color;

/// How a run of text is drawn: a color pair plus attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Style {
    pub pair: u8,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub inverse: bool,
}

impl Style {
    pub fn with_pair(pair: u8) -> Self {
        Self {
            pair,
            ..Self::default()
        }
    }
}

/// The physical screen. Coordinates are absolute screen cells, rows first.
pub trait Screen: Send {
    /// `(rows, cols)`
    fn size(&self) -> (u16, u16);
    fn set_size(&mut self, rows: u16, cols: u16);
    fn draw(&mut self, y: u16, x: u16, text: &str, style: Style) -> Result<()>;
    fn move_cursor(&mut self, y: u16, x: u16) -> Result<()>;
    fn show_cursor(&mut self, visible: bool) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
    /// Push everything drawn so far to the terminal.
    fn refresh(&mut self) -> Result<()>;
}

/// A [Screen] drawing with crossterm commands. Commands are queued into a
/// buffer and only reach `output` on [Screen::refresh].
pub struct CrosstermScreen<W: Write> {
    output: W,
    pending: Vec<u8>,
    rows: u16,
    cols: u16,
}

impl<W: Write> CrosstermScreen<W> {
    pub fn new(output: W, rows: u16, cols: u16) -> Self {
        Self {
            output,
            pending: Vec::new(),
            rows,
            cols,
        }
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

impl<W: Write + Send> Screen for CrosstermScreen<W> {
    fn size(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }

    fn set_size(&mut self, rows: u16, cols: u16) {
        self.rows = rows;
        self.cols = cols;
    }

    fn draw(&mut self, y: u16, x: u16, text: &str, style: Style) -> Result<()> {
        if y >= self.rows || x >= self.cols {
            return Ok(());
        }
        let (fg, bg) = color::pair_colors(style.pair);
        queue!(
            self.pending,
            MoveTo(x, y),
            SetAttribute(Attribute::Reset),
            SetColors(Colors::new(color::screen_color(fg), color::screen_color(bg)))
        )?;
        if style.bold {
            queue!(self.pending, SetAttribute(Attribute::Bold))?;
        }
        if style.italic {
            queue!(self.pending, SetAttribute(Attribute::Italic))?;
        }
        if style.underline {
            queue!(self.pending, SetAttribute(Attribute::Underlined))?;
        }
        if style.inverse {
            queue!(self.pending, SetAttribute(Attribute::Reverse))?;
        }
        queue!(self.pending, Print(text))?;
        Ok(())
    }

    fn move_cursor(&mut self, y: u16, x: u16) -> Result<()> {
        queue!(self.pending, MoveTo(x, y))?;
        Ok(())
    }

    fn show_cursor(&mut self, visible: bool) -> Result<()> {
        if visible {
            queue!(self.pending, Show)?;
        } else {
            queue!(self.pending, Hide)?;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        queue!(
            self.pending,
            SetAttribute(Attribute::Reset),
            Clear(ClearType::All)
        )?;
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.output.write_all(&self.pending)?;
        self.output.flush()?;
        self.pending.clear();
        Ok(())
    }
}

/// In-memory screen for tests: remembers the last text drawn at every cell.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct GridScreen {
    pub rows: u16,
    pub cols: u16,
    pub cells: std::collections::HashMap<(u16, u16), (String, Style)>,
    pub cursor: (u16, u16),
    pub cursor_visible: bool,
    pub draws: usize,
    pub refreshes: usize,
}

#[cfg(test)]
impl GridScreen {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows,
            cols,
            cursor_visible: true,
            ..Self::default()
        }
    }

    pub fn text_at(&self, y: u16, x: u16) -> Option<&str> {
        self.cells.get(&(y, x)).map(|(text, _)| text.as_str())
    }

    /// One row as a string, unpainted cells shown as `~`.
    pub fn row(&self, y: u16) -> String {
        (0..self.cols)
            .map(|x| self.text_at(y, x).unwrap_or("~").to_string())
            .collect()
    }
}

#[cfg(test)]
impl Screen for GridScreen {
    fn size(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }

    fn set_size(&mut self, rows: u16, cols: u16) {
        self.rows = rows;
        self.cols = cols;
    }

    fn draw(&mut self, y: u16, x: u16, text: &str, style: Style) -> Result<()> {
        self.draws += 1;
        for (offset, ch) in text.chars().enumerate() {
            let x = x + offset as u16;
            if y < self.rows && x < self.cols {
                self.cells.insert((y, x), (ch.to_string(), style));
            }
        }
        Ok(())
    }

    fn move_cursor(&mut self, y: u16, x: u16) -> Result<()> {
        self.cursor = (y, x);
        Ok(())
    }

    fn show_cursor(&mut self, visible: bool) -> Result<()> {
        self.cursor_visible = visible;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.cells.clear();
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        self.refreshes += 1;
        Ok(())
    }
}

/// A [GridScreen] that stays inspectable after being boxed into something
/// else.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct SharedGrid(std::sync::Arc<parking_lot::Mutex<GridScreen>>);

#[cfg(test)]
impl SharedGrid {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self(std::sync::Arc::new(parking_lot::Mutex::new(GridScreen::new(rows, cols))))
    }

    pub fn lock(&self) -> parking_lot::MutexGuard<'_, GridScreen> {
        self.0.lock()
    }
}

#[cfg(test)]
impl Screen for SharedGrid {
    fn size(&self) -> (u16, u16) {
        self.0.lock().size()
    }

    fn set_size(&mut self, rows: u16, cols: u16) {
        self.0.lock().set_size(rows, cols)
    }

    fn draw(&mut self, y: u16, x: u16, text: &str, style: Style) -> Result<()> {
        self.0.lock().draw(y, x, text, style)
    }

    fn move_cursor(&mut self, y: u16, x: u16) -> Result<()> {
        self.0.lock().move_cursor(y, x)
    }

    fn show_cursor(&mut self, visible: bool) -> Result<()> {
        self.0.lock().show_cursor(visible)
    }

    fn clear(&mut self) -> Result<()> {
        self.0.lock().clear()
    }

    fn refresh(&mut self) -> Result<()> {
        self.0.lock().refresh()
    }
}
