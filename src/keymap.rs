use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::plugin::PluginId;

/// Invoked with the extension key that followed the command prefix.
pub type KeyCallback = Arc<dyn Fn(u32) + Send + Sync>;

#[derive(Clone)]
pub struct Binding {
    pub owner: PluginId,
    pub callback: KeyCallback,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding").field("owner", &self.owner).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KeymapError {
    #[error("key {0:#x} is already bound")]
    AlreadyBound(u32),
    #[error("key {0:#x} is not bound")]
    NotBound(u32),
}

/// Extension keys reachable after the command prefix, one binding per code.
#[derive(Debug, Default)]
pub struct Keymap {
    bindings: HashMap<u32, Binding>,
}

impl Keymap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, code: u32, binding: Binding) -> Result<(), KeymapError> {
        if self.bindings.contains_key(&code) {
            return Err(KeymapError::AlreadyBound(code));
        }
        self.bindings.insert(code, binding);
        Ok(())
    }

    /// Bind `code` whether or not it is bound already. The superseded binding
    /// is handed back so the caller can tell its owner.
    pub fn rebind(&mut self, code: u32, binding: Binding) -> Option<Binding> {
        let previous = self.bindings.insert(code, binding);
        if let Some(previous) = &previous {
            log::debug!(
                "key {code:#x} rebound, dropping binding owned by plugin {}",
                previous.owner
            );
        }
        previous
    }

    pub fn unbind(&mut self, code: u32) -> Result<Binding, KeymapError> {
        self.bindings
            .remove(&code)
            .ok_or(KeymapError::NotBound(code))
    }

    pub fn get(&self, code: u32) -> Option<&Binding> {
        self.bindings.get(&code)
    }

    /// Remove every binding owned by `owner`, returning the freed codes.
    pub fn release_owner(&mut self, owner: PluginId) -> Vec<u32> {
        let mut codes: Vec<u32> = self
            .bindings
            .iter()
            .filter(|(_, binding)| binding.owner == owner)
            .map(|(code, _)| *code)
            .collect();
        codes.sort_unstable();
        for code in &codes {
            self.bindings.remove(code);
        }
        codes
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::{Binding, Keymap, KeymapError};
    use crate::plugin::PluginId;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
use thiserror::Error;

    fn binding(owner: u32, hits: &Arc<AtomicU32>) -> Binding {
        let hits = Arc::clone(hits);
        Binding {
            owner: PluginId(owner),
            callback: Arc::new(move |code| {
                hits.fetch_add(code, Ordering::SeqCst);
            }),
        }
    }

    #[test]
    fn bind_then_lookup_returns_same_callback() {
        let hits = Arc::new(AtomicU32::new(0));
        let mut keymap = Keymap::new();
        let bound = binding(1, &hits);
        keymap.bind('c' as u32, bound.clone()).unwrap();

        let found = keymap.get('c' as u32).unwrap();
        assert!(Arc::ptr_eq(&found.callback, &bound.callback));
        assert_eq!(found.owner, PluginId(1));
        (found.callback)(3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn double_bind_fails() {
        let hits = Arc::new(AtomicU32::new(0));
        let mut keymap = Keymap::new();
        keymap.bind(7, binding(1, &hits)).unwrap();
        assert_eq!(
            keymap.bind(7, binding(2, &hits)).unwrap_err(),
            KeymapError::AlreadyBound(7)
        );
        assert_eq!(keymap.get(7).unwrap().owner, PluginId(1));
    }

    #[test]
    fn unbind_unknown_fails() {
        let mut keymap = Keymap::new();
        let err = keymap.unbind(9).unwrap_err();
        assert_eq!(err, KeymapError::NotBound(9));
        assert_eq!(err.to_string(), "key 0x9 is not bound");
    }

    #[test]
    fn unbind_then_lookup_is_unbound() {
        let hits = Arc::new(AtomicU32::new(0));
        let mut keymap = Keymap::new();
        keymap.bind(9, binding(1, &hits)).unwrap();
        assert!(keymap.unbind(9).is_ok());
        assert!(keymap.get(9).is_none());
    }

    #[test]
    fn rebind_returns_superseded() {
        let hits = Arc::new(AtomicU32::new(0));
        let mut keymap = Keymap::new();
        assert!(keymap.rebind(4, binding(1, &hits)).is_none());
        let previous = keymap.rebind(4, binding(2, &hits)).unwrap();
        assert_eq!(previous.owner, PluginId(1));
        assert_eq!(keymap.get(4).unwrap().owner, PluginId(2));
    }

    #[test]
    fn release_owner_only_drops_that_owner() {
        let hits = Arc::new(AtomicU32::new(0));
        let mut keymap = Keymap::new();
        keymap.bind(1, binding(1, &hits)).unwrap();
        keymap.bind(2, binding(2, &hits)).unwrap();
        keymap.bind(3, binding(1, &hits)).unwrap();
        assert_eq!(keymap.release_owner(PluginId(1)), vec![1, 3]);
        assert_eq!(keymap.len(), 1);
        assert!(keymap.get(2).is_some());
    }
}
