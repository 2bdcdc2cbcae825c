//! Everything behind the screen lock: the physical screen, the edge-window
//! layout, overlay panels and one [TermWin] per terminal.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use unicode_width::UnicodeWidthChar;

use super::TerminalId;
use crate::layout::{Layout, Region, Side};
use crate::plugin::{Chain, Dims, PluginId};
use crate::screen::{Screen, Style};
use crate::term_state::TermState;
use crate::term_win::{Paint, TermWin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WinId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanelId(pub u32);

/// Something a plugin can draw on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    Window(WinId),
    Panel(PanelId),
}

/// Told about an edge window's (new) region, or that it lost it.
pub type WinCallback = Arc<dyn Fn(WinId, Region) + Send + Sync>;
pub type PanelCallback = Arc<dyn Fn(PanelId, Dims) + Send + Sync>;

struct EdgeWindow {
    owner: PluginId,
    region: Region,
    on_alloc: Option<WinCallback>,
    on_free: Option<WinCallback>,
}

struct Panel {
    owner: PluginId,
    /// As requested, before clipping to the screen.
    wanted: Region,
    region: Region,
    on_resize: Option<PanelCallback>,
}

struct TermSlot {
    /// `None` renders into the primary region.
    target: Option<Surface>,
    win: TermWin,
}

/// A window or panel callback, collected under the screen lock and fired
/// after it is released.
pub enum Notice {
    Alloc(WinCallback, WinId, Region),
    Free(WinCallback, WinId, Region),
    Resize(PanelCallback, PanelId, Dims),
}

impl Notice {
    pub fn fire(self) {
        match self {
            Notice::Alloc(callback, id, region) | Notice::Free(callback, id, region) => callback(id, region),
            Notice::Resize(callback, id, dims) => callback(id, dims),
        }
    }
}

impl fmt::Debug for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Alloc(_, id, region) => write!(f, "Alloc({id:?}, {region:?})"),
            Notice::Free(_, id, region) => write!(f, "Free({id:?}, {region:?})"),
            Notice::Resize(_, id, dims) => write!(f, "Resize({id:?}, {dims:?})"),
        }
    }
}

pub struct ScreenState {
    screen: Box<dyn Screen>,
    color: bool,
    layout: Layout<WinId>,
    windows: HashMap<WinId, EdgeWindow>,
    panels: BTreeMap<PanelId, Panel>,
    terms: HashMap<TerminalId, TermSlot>,
    primary: Region,
    primary_term: Option<TerminalId>,
    next_id: u32,
}

impl ScreenState {
    pub fn new(screen: Box<dyn Screen>, color: bool) -> Self {
        let (rows, cols) = screen.size();
        Self {
            screen,
            color,
            layout: Layout::new(),
            windows: HashMap::new(),
            panels: BTreeMap::new(),
            terms: HashMap::new(),
            primary: Region::new(0, 0, rows, cols),
            primary_term: None,
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn size(&self) -> (u16, u16) {
        self.screen.size()
    }

    pub fn set_size(&mut self, rows: u16, cols: u16) {
        self.screen.set_size(rows, cols);
    }

    pub fn primary_region(&self) -> Region {
        self.primary
    }

    /// Re-apply the layout to the current screen size and clear the screen.
    /// Every allocated window hears about its region (its old contents are
    /// gone), windows that lost their space are freed and every panel is told
    /// its dims.
    pub fn relayout(&mut self) -> Result<Vec<Notice>> {
        let (rows, cols) = self.size();
        let allocation = self.layout.apply(rows, cols);
        let mut notices = Vec::new();

        let mut ids: Vec<WinId> = self.windows.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let Some(window) = self.windows.get_mut(&id) else {
                continue;
            };
            let old = window.region;
            window.region = allocation
                .as_ref()
                .map_or(Region::EMPTY, |allocation| allocation.region(&id));

            if window.region.is_allocated() {
                if let Some(callback) = &window.on_alloc {
                    notices.push(Notice::Alloc(Arc::clone(callback), id, window.region));
                }
            } else if old.is_allocated() {
                log::debug!("window {id:?} no longer fits");
                if let Some(callback) = &window.on_free {
                    notices.push(Notice::Free(Arc::clone(callback), id, old));
                }
            }
        }
        self.primary = allocation.map_or(Region::EMPTY, |allocation| allocation.primary);

        let screen = Region::new(0, 0, rows, cols);
        for (id, panel) in self.panels.iter_mut() {
            panel.region = panel.wanted.intersect(&screen).unwrap_or(Region::EMPTY);
            if let Some(callback) = &panel.on_resize {
                let dims = Dims {
                    rows: panel.region.rows,
                    cols: panel.region.cols,
                };
                notices.push(Notice::Resize(Arc::clone(callback), *id, dims));
            }
        }

        self.screen.clear()?;
        Ok(notices)
    }

    /// Queue an edge window. It gets a region on the next relayout.
    pub fn alloc_window(
        &mut self,
        owner: PluginId,
        side: Side,
        size: u16,
        on_alloc: Option<WinCallback>,
        on_free: Option<WinCallback>,
    ) -> WinId {
        let id = WinId(self.next_id());
        self.layout.push(side, id, size);
        self.windows.insert(
            id,
            EdgeWindow {
                owner,
                region: Region::EMPTY,
                on_alloc,
                on_free,
            },
        );
        id
    }

    /// Forget a window. `None` if there was no such window; otherwise the
    /// free notice to fire, if it held space.
    pub fn dealloc_window(&mut self, id: WinId) -> Option<Option<Notice>> {
        let window = self.windows.remove(&id)?;
        self.layout.remove(id);
        if !window.region.is_allocated() {
            return Some(None);
        }
        Some(
            window
                .on_free
                .map(|callback| Notice::Free(callback, id, window.region)),
        )
    }

    pub fn alloc_panel(&mut self, owner: PluginId, wanted: Region, on_resize: Option<PanelCallback>) -> PanelId {
        let id = PanelId(self.next_id());
        let (rows, cols) = self.size();
        let region = wanted
            .intersect(&Region::new(0, 0, rows, cols))
            .unwrap_or(Region::EMPTY);
        self.panels.insert(
            id,
            Panel {
                owner,
                wanted,
                region,
                on_resize,
            },
        );
        id
    }

    /// Remove a panel, blanking what it covered and damaging any terminal
    /// underneath so it is repainted.
    pub fn dealloc_panel(&mut self, id: PanelId) -> Result<bool> {
        let Some(panel) = self.panels.remove(&id) else {
            return Ok(false);
        };
        let region = panel.region;
        if region.is_allocated() {
            let blank = " ".repeat(usize::from(region.cols));
            for y in region.y..region.y + region.rows {
                self.screen.draw(y, region.x, &blank, Style::default())?;
            }
            for slot in self.terms.values_mut() {
                slot.win.damage_area(region);
            }
        }
        Ok(true)
    }

    pub fn windows_owned_by(&self, owner: PluginId) -> Vec<WinId> {
        let mut ids: Vec<WinId> = self
            .windows
            .iter()
            .filter(|(_, window)| window.owner == owner)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn panels_owned_by(&self, owner: PluginId) -> Vec<PanelId> {
        self.panels
            .iter()
            .filter(|(_, panel)| panel.owner == owner)
            .map(|(id, _)| *id)
            .collect()
    }

    /// The surface's region, if it exists and currently has space.
    pub fn region(&self, surface: Surface) -> Option<Region> {
        let region = match surface {
            Surface::Window(id) => self.windows.get(&id)?.region,
            Surface::Panel(id) => self.panels.get(&id)?.region,
        };
        Some(region).filter(Region::is_allocated)
    }

    pub fn exists(&self, surface: Surface) -> bool {
        match surface {
            Surface::Window(id) => self.windows.contains_key(&id),
            Surface::Panel(id) => self.panels.contains_key(&id),
        }
    }

    fn target_region(&self, target: Option<Surface>) -> Option<Region> {
        match target {
            Some(surface) => self.region(surface),
            None => Some(self.primary).filter(Region::is_allocated),
        }
    }

    /// Size a new terminal for `target` should start with.
    pub fn target_size(&self, target: Option<Surface>) -> Option<(u16, u16)> {
        self.target_region(target).map(|region| (region.rows, region.cols))
    }

    pub fn attach(&mut self, id: TerminalId, target: Option<Surface>, primary: bool) {
        let region = self.target_region(target);
        self.terms.insert(
            id,
            TermSlot {
                target,
                win: TermWin::new(region, primary),
            },
        );
        if primary {
            self.primary_term = Some(id);
        }
    }

    pub fn detach(&mut self, id: TerminalId) -> bool {
        if self.primary_term == Some(id) {
            self.primary_term = None;
        }
        self.terms.remove(&id).is_some()
    }

    /// Bring a terminal's window up to date with `term`, resizing both if the
    /// window's region moved. `full` repaints every cell. Returns the new
    /// size when the terminal was resized.
    pub fn sync_terminal(
        &mut self,
        id: TerminalId,
        term: &mut TermState,
        chain: &Chain,
        full: bool,
    ) -> Result<Option<(u16, u16)>> {
        let covered: Vec<Region> = self
            .panels
            .values()
            .map(|panel| panel.region)
            .filter(Region::is_allocated)
            .collect();
        let region = match self.terms.get(&id) {
            Some(slot) => self.target_region(slot.target),
            None => return Ok(None),
        };
        let Some(slot) = self.terms.get_mut(&id) else {
            return Ok(None);
        };

        let mut resized = None;
        if slot.win.region() != region {
            slot.win.resize(region, term);
            resized = region.map(|region| (region.rows, region.cols));
        } else if full {
            term.invalidate();
        }

        let paint = Paint {
            color: self.color,
            covered: &covered,
        };
        slot.win.sync(term, self.screen.as_mut(), chain, paint)?;
        Ok(resized)
    }

    /// Draw `text` on a surface at `(y, x)` relative to it, clipped to its
    /// region. Windows never draw under a panel. Wide characters take two
    /// columns and are dropped whole rather than split at an edge.
    pub fn draw_text(&mut self, surface: Surface, y: u16, x: u16, text: &str, style: Style) -> Result<bool> {
        let Some(region) = self.region(surface) else {
            return Ok(false);
        };
        if y >= region.rows {
            return Ok(true);
        }
        let covered: Vec<Region> = match surface {
            Surface::Window(_) => self
                .panels
                .values()
                .map(|panel| panel.region)
                .filter(Region::is_allocated)
                .collect(),
            Surface::Panel(_) => Vec::new(),
        };

        let abs_y = region.y + y;
        let mut buf = [0u8; 4];
        let mut col = x;
        for c in text.chars() {
            let width = c.width().map_or(0, |width| width as u16);
            if width == 0 {
                continue;
            }
            if col.saturating_add(width) > region.cols {
                break;
            }
            let abs_x = region.x + col;
            col += width;
            let hidden = |cell: u16| covered.iter().any(|over| over.contains(abs_y, cell));
            if !(abs_x..abs_x + width).any(hidden) {
                self.screen.draw(abs_y, abs_x, c.encode_utf8(&mut buf), style)?;
            }
        }
        Ok(true)
    }

    pub fn clear_surface(&mut self, surface: Surface) -> Result<bool> {
        let Some(region) = self.region(surface) else {
            return Ok(false);
        };
        let blank = " ".repeat(usize::from(region.cols));
        for y in 0..region.rows {
            self.draw_text(surface, y, 0, &blank, Style::default())?;
        }
        Ok(true)
    }

    /// Put the physical cursor back on the primary terminal and flush.
    pub fn refresh(&mut self) -> Result<()> {
        let cursor = self
            .primary_term
            .and_then(|id| self.terms.get(&id))
            .and_then(|slot| slot.win.screen_cursor());
        if let Some((y, x)) = cursor {
            self.screen.move_cursor(y, x)?;
        }
        self.screen.refresh()
    }
}
