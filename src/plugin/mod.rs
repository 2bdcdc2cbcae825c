//! Plugin events, callback tables and the dispatch chain.
//!
//! A plugin hands the runtime a [Callbacks] table. Whenever something
//! interceptable happens the runtime folds the event through every active
//! plugin's table in stack order: each callback either passes the (possibly
//! rewritten) event on with [Outcome::Continue] or stops the chain with
//! [Outcome::Cancel]. For input, cell and cursor events a cancel also
//! suppresses the effect itself.

pub mod loader;
pub mod registry;

use std::fmt;
use std::sync::Arc;

use crate::screen::Style;
use crate::term_state::ScrollEvent;

pub const API_VERSION_MAJOR: u16 = 1;
pub const API_VERSION_MINOR: u16 = 0;

/// Stable handle for a loaded (or loading) plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(pub u32);

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A cell about to be drawn, in coordinates relative to its terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellUpdate {
    pub row: u16,
    pub col: u16,
    pub text: String,
    pub style: Style,
}

/// `(row, col)` positions relative to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorMove {
    pub from: (u16, u16),
    pub to: (u16, u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims {
    pub rows: u16,
    pub cols: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A character code typed by the user, before it reaches the child.
    InputChar(u32),
    CellUpdate(CellUpdate),
    PreScroll(ScrollEvent),
    PostScroll(ScrollEvent),
    CursorMove(CursorMove),
    ScreenDimsChange(Dims),
    PrimaryDimsChange(Dims),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    InputChar,
    CellUpdate,
    PreScroll,
    PostScroll,
    CursorMove,
    ScreenDimsChange,
    PrimaryDimsChange,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::InputChar,
        EventKind::CellUpdate,
        EventKind::PreScroll,
        EventKind::PostScroll,
        EventKind::CursorMove,
        EventKind::ScreenDimsChange,
        EventKind::PrimaryDimsChange,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::InputChar(_) => EventKind::InputChar,
            Event::CellUpdate(_) => EventKind::CellUpdate,
            Event::PreScroll(_) => EventKind::PreScroll,
            Event::PostScroll(_) => EventKind::PostScroll,
            Event::CursorMove(_) => EventKind::CursorMove,
            Event::ScreenDimsChange(_) => EventKind::ScreenDimsChange,
            Event::PrimaryDimsChange(_) => EventKind::PrimaryDimsChange,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue(Event),
    Cancel,
}

pub type Callback = Arc<dyn Fn(Event) -> Outcome + Send + Sync>;

/// One plugin's callbacks, at most one per [EventKind].
#[derive(Clone, Default)]
pub struct Callbacks {
    entries: [Option<Callback>; 7],
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [Callbacks::set].
    pub fn on<F>(mut self, kind: EventKind, callback: F) -> Self
    where
        F: Fn(Event) -> Outcome + Send + Sync + 'static,
    {
        self.set(kind, Some(Arc::new(callback)));
        self
    }

    pub fn set(&mut self, kind: EventKind, callback: Option<Callback>) {
        self.entries[kind.slot()] = callback;
    }

    pub fn get(&self, kind: EventKind) -> Option<&Callback> {
        self.entries[kind.slot()].as_ref()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<EventKind> = EventKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_some())
            .collect();
        f.debug_struct("Callbacks").field("kinds", &kinds).finish()
    }
}

/// A snapshot of the active plugins' callback tables, in stack order.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    tables: Vec<Arc<Callbacks>>,
}

impl Chain {
    pub fn new(tables: Vec<Arc<Callbacks>>) -> Self {
        Self { tables }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Fold `event` through every table that handles its kind. Returns the
    /// final event, or `None` if some plugin cancelled it.
    pub fn dispatch(&self, event: Event) -> Option<Event> {
        let kind = event.kind();
        let mut event = event;
        for callback in self.tables.iter().filter_map(|table| table.get(kind)) {
            match callback(event) {
                Outcome::Continue(next) if next.kind() == kind => event = next,
                Outcome::Continue(next) => {
                    log::error!(
                        "plugin callback for {kind:?} answered with {:?}, cancelling",
                        next.kind()
                    );
                    return None;
                }
                Outcome::Cancel => return None,
            }
        }
        Some(event)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    fn cell(text: &str) -> Event {
        Event::CellUpdate(CellUpdate {
            row: 0,
            col: 0,
            text: text.to_string(),
            style: Style::default(),
        })
    }

    #[test]
    fn empty_chain_passes_events_through() {
        assert_eq!(Chain::empty().dispatch(Event::InputChar(65)), Some(Event::InputChar(65)));
    }

    #[test]
    fn cancel_stops_later_plugins() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Callbacks::new().on(EventKind::CellUpdate, |_| Outcome::Cancel);
        let second_seen = Arc::clone(&seen);
        let second = Callbacks::new().on(EventKind::CellUpdate, move |event| {
            second_seen.lock().unwrap().push(event.clone());
            Outcome::Continue(event)
        });
        let chain = Chain::new(vec![Arc::new(first), Arc::new(second)]);

        assert_eq!(chain.dispatch(cell("x")), None);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn rewrites_flow_in_stack_order() {
        let upper = Callbacks::new().on(EventKind::InputChar, |event| match event {
            Event::InputChar(code) => Outcome::Continue(Event::InputChar(code - 32)),
            other => Outcome::Continue(other),
        });
        let plus_one = Callbacks::new().on(EventKind::InputChar, |event| match event {
            Event::InputChar(code) => Outcome::Continue(Event::InputChar(code + 1)),
            other => Outcome::Continue(other),
        });
        let chain = Chain::new(vec![Arc::new(upper), Arc::new(plus_one)]);
        assert_eq!(chain.dispatch(Event::InputChar('a' as u32)), Some(Event::InputChar('B' as u32)));
    }

    #[test]
    fn tables_without_the_kind_are_skipped() {
        let only_cells = Callbacks::new().on(EventKind::CellUpdate, |_| Outcome::Cancel);
        let chain = Chain::new(vec![Arc::new(only_cells), Arc::new(Callbacks::new())]);
        assert_eq!(chain.dispatch(Event::InputChar(1)), Some(Event::InputChar(1)));
    }

    #[test]
    fn wrong_kind_answer_cancels() {
        let confused = Callbacks::new().on(EventKind::InputChar, |_| Outcome::Continue(cell("?")));
        let chain = Chain::new(vec![Arc::new(confused)]);
        assert_eq!(chain.dispatch(Event::InputChar(1)), None);
    }

    #[test]
    fn debug_lists_registered_kinds() {
        let table = Callbacks::new().on(EventKind::PostScroll, Outcome::Continue);
        assert_eq!(format!("{table:?}"), "Callbacks { kinds: [PostScroll] }");
    }
}
