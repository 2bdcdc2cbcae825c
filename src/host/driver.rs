use anyhow::Result;
use std::sync::Arc;

use super::{encode_codes, Host, Terminal};
use crate::mux::MuxHandler;
use crate::plugin::{Chain, Event};
use crate::term_state::ScrollPhase;

/// Connects one terminal to the I/O loop. Only the primary terminal runs
/// input and output through the plugin chain.
pub struct TerminalDriver {
    host: Arc<Host>,
    terminal: Arc<Terminal>,
    primary: bool,
    /// The command prefix was typed; the next key goes to the keymap.
    prefixed: bool,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    partial: Vec<u8>,
}

impl TerminalDriver {
    pub fn new(host: Arc<Host>, terminal: Arc<Terminal>, primary: bool) -> Self {
        Self {
            host,
            terminal,
            primary,
            prefixed: false,
            partial: Vec::new(),
        }
    }

    fn chain(&self) -> Chain {
        if self.primary {
            self.host.chain()
        } else {
            Chain::empty()
        }
    }

    fn key(&mut self, code: u32) -> Result<()> {
        // A prefix covers exactly the next key, even one a plugin swallows.
        let prefixed = std::mem::take(&mut self.prefixed);
        let code = match self.chain().dispatch(Event::InputChar(code)) {
            Some(Event::InputChar(code)) => code,
            _ => return Ok(()),
        };

        if prefixed {
            return match self.host.binding(code) {
                Some(binding) => {
                    (binding.callback)(code);
                    Ok(())
                }
                None => self.forward(&[self.host.command_key(), code]),
            };
        }
        if code == self.host.command_key() {
            self.prefixed = true;
            return Ok(());
        }
        self.forward(&[code])
    }

    fn forward(&self, codes: &[u32]) -> Result<()> {
        self.terminal.write(&encode_codes(codes))?;
        Ok(())
    }
}

impl MuxHandler for TerminalDriver {
    fn child_output(&mut self, bytes: &[u8]) -> Result<()> {
        let chain = self.chain();
        let mut state = self.terminal.state.lock();
        state.process(bytes, &mut |phase, scroll| {
            let event = match phase {
                ScrollPhase::Pre => Event::PreScroll(scroll.clone()),
                ScrollPhase::Post => Event::PostScroll(scroll.clone()),
            };
            // The grid has committed to the scroll; a cancel only stops the
            // plugins further down the stack from hearing about it.
            if chain.dispatch(event).is_none() {
                log::debug!(
                    "{phase:?} scroll {:?} by {} in rows {}..={} cancelled by a plugin",
                    scroll.direction,
                    scroll.lines,
                    scroll.top,
                    scroll.bottom
                );
            }
        });
        Ok(())
    }

    fn input(&mut self, bytes: &[u8]) -> Result<()> {
        for code in decode_utf8(&mut self.partial, bytes) {
            self.key(code)?;
        }
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        self.host.sync_terminal(&self.terminal, false)?;
        Ok(())
    }
}

/// Decode as many complete characters as `partial` plus `bytes` hold. Bytes
/// that can never be valid UTF-8 come out as their own codes; an incomplete
/// sequence at the end waits in `partial` for the next read.
fn decode_utf8(partial: &mut Vec<u8>, bytes: &[u8]) -> Vec<u32> {
    partial.extend_from_slice(bytes);
    let buf = std::mem::take(partial);
    let mut codes = Vec::with_capacity(buf.len());
    let mut rest = &buf[..];

    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                codes.extend(text.chars().map(u32::from));
                rest = &[];
                break;
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                if let Ok(text) = std::str::from_utf8(valid) {
                    codes.extend(text.chars().map(u32::from));
                }
                match err.error_len() {
                    Some(len) => {
                        codes.extend(after[..len].iter().map(|b| u32::from(*b)));
                        rest = &after[len..];
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }

    *partial = rest.to_vec();
    codes
}
