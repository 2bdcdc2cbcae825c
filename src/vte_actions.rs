use crate::vte_actions::VteAction::{
    AlternateScreen, LineFeed, Print, Reset, ResetScrollRegion, ReverseIndex, ScrollDown,
    ScrollUp, SetScrollRegion,
};
use vte::{Params, Parser, Perform};

/// The actions in a byte stream that can move the contents of the screen or
/// change where it scrolls. Everything else the child sends is left to the
/// terminal state.
///
/// ESC D and ESC E are absent because vt100 does not act on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VteAction {
    /// A printable character, which may wrap the cursor onto the next line.
    Print(char),
    /// LF, VT or FF.
    LineFeed,
    /// ESC M
    ReverseIndex,
    /// ESC c
    Reset,
    /// CSI n S
    ScrollUp(u16),
    /// CSI n T
    ScrollDown(u16),
    /// CSI top ; bottom r, 1-based and inclusive as sent.
    SetScrollRegion(u16, u16),
    /// CSI r without parameters.
    ResetScrollRegion,
    /// CSI ? 47 h/l or CSI ? 1049 h/l. `cleared` is set when the alternate
    /// screen is entered fresh, which also resets its scroll region.
    AlternateScreen { cleared: bool },
}

/// A wrapper over [Parser] and [Perform] which takes bytes in and reports the
/// scroll-related actions they complete. Stops short of tracking the rendered
/// output as a grid of cells.
pub struct VteActionParser {
    parser: Parser,
}

impl VteActionParser {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }

    #[cfg(test)]
    pub fn parse_bytes(&mut self, bytes: &[u8]) -> Vec<VteAction> {
        let mut performer = Performer::new();
        for byte in bytes {
            self.parser.advance(&mut performer, *byte)
        }
        performer.actions
    }

    /// Feed a single byte, returning the action it completes, if any.
    pub fn advance(&mut self, byte: u8) -> Option<VteAction> {
        let mut performer = Performer::new();
        self.parser.advance(&mut performer, byte);
        performer.actions.pop()
    }
}

impl Default for VteActionParser {
    fn default() -> Self {
        Self::new()
    }
}

// Private struct to hide this implementation detail
struct Performer {
    actions: Vec<VteAction>,
}

impl Performer {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }
}

// Implementation largely inspired by vt100-rust:
// https://github.com/doy/vt100-rust/blob/main/src/perform.rs
impl Perform for Performer {
    fn print(&mut self, c: char) {
        self.actions.push(Print(c));
    }

    fn execute(&mut self, byte: u8) {
        if let 10..=12 = byte {
            self.actions.push(LineFeed);
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        if intermediates.is_empty() {
            let action = match byte {
                b'M' => ReverseIndex,
                b'c' => Reset,
                _ => return,
            };
            self.actions.push(action);
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], _ignore: bool, c: char) {
        if intermediates.is_empty() {
            let action = match c {
                'S' => ScrollUp(params.canonicalize_1(1)),
                'T' => ScrollDown(params.canonicalize_1(1)),
                'r' => match params.pair() {
                    Some((top, bottom)) => SetScrollRegion(top, bottom),
                    None => ResetScrollRegion,
                },
                _ => return,
            };
            self.actions.push(action);
        } else if intermediates == [b'?'] && matches!(c, 'h' | 'l') {
            let mut modes = params.iter().filter_map(|x| match x {
                [47] => Some(false),
                [1049] => Some(c == 'h'),
                _ => None,
            });
            if let Some(first) = modes.next() {
                let cleared = first || modes.any(|cleared| cleared);
                self.actions.push(AlternateScreen { cleared });
            }
        }
    }
}

trait ParamsCanonicalize {
    fn canonicalize_1(&self, default: u16) -> u16;
    fn pair(&self) -> Option<(u16, u16)>;
}

impl ParamsCanonicalize for Params {
    fn canonicalize_1(&self, default: u16) -> u16 {
        self.iter()
            .next()
            .and_then(|x| x.first().copied())
            .filter(|x| *x != 0)
            .unwrap_or(default)
    }

    fn pair(&self) -> Option<(u16, u16)> {
        let mut iter = self.iter().map(|x| x.first().copied().unwrap_or(0));
        match (iter.next(), iter.next()) {
            (None, _) | (Some(0), None) => None,
            (Some(top), bottom) => Some((top.max(1), bottom.unwrap_or(0))),
        }
    }
}
