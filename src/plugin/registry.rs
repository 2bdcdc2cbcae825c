use std::collections::HashMap;
use std::sync::Arc;

use super::loader::FreeFn;
use super::{Callbacks, Chain, PluginId};

struct Record {
    id: PluginId,
    name: String,
    free: Option<FreeFn>,
    callbacks: Option<Arc<Callbacks>>,
}

/// The plugin stack.
///
/// A plugin is *pending* while its init runs: it has an id and may set
/// callbacks but takes no part in dispatch. Activation appends it to the
/// stack, which is the order events flow through.
#[derive(Default)]
pub struct Registry {
    next_id: u32,
    pending: HashMap<PluginId, Record>,
    stack: Vec<Record>,
    index: HashMap<PluginId, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, name: &str) -> PluginId {
        self.next_id += 1;
        let id = PluginId(self.next_id);
        self.pending.insert(
            id,
            Record {
                id,
                name: name.to_owned(),
                free: None,
                callbacks: None,
            },
        );
        id
    }

    /// Move a pending plugin onto the top of the stack.
    pub fn activate(&mut self, id: PluginId, free: FreeFn) {
        let Some(mut record) = self.pending.remove(&id) else {
            panic!("activating plugin {id} which is not pending");
        };
        record.free = Some(free);
        self.index.insert(id, self.stack.len());
        self.stack.push(record);
    }

    /// Drop a pending plugin whose init failed. Its free is never run.
    pub fn discard(&mut self, id: PluginId) -> bool {
        self.pending.remove(&id).is_some()
    }

    fn record(&self, id: PluginId) -> Option<&Record> {
        match self.index.get(&id) {
            Some(&i) => self.stack.get(i),
            None => self.pending.get(&id),
        }
    }

    fn record_mut(&mut self, id: PluginId) -> Option<&mut Record> {
        match self.index.get(&id) {
            Some(&i) => self.stack.get_mut(i),
            None => self.pending.get_mut(&id),
        }
    }

    pub fn contains(&self, id: PluginId) -> bool {
        self.record(id).is_some()
    }

    pub fn is_active(&self, id: PluginId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn name(&self, id: PluginId) -> Option<&str> {
        self.record(id).map(|record| record.name.as_str())
    }

    /// Active plugins, bottom of the stack first.
    pub fn ids(&self) -> Vec<PluginId> {
        self.stack.iter().map(|record| record.id).collect()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn callbacks(&self, id: PluginId) -> Option<Arc<Callbacks>> {
        self.record(id)?.callbacks.clone()
    }

    /// Returns false if `id` is unknown.
    pub fn set_callbacks(&mut self, id: PluginId, callbacks: Option<Callbacks>) -> bool {
        match self.record_mut(id) {
            Some(record) => {
                record.callbacks = callbacks.map(Arc::new);
                true
            }
            None => false,
        }
    }

    /// The callback tables of every active plugin, in stack order.
    pub fn snapshot(&self) -> Chain {
        Chain::new(
            self.stack
                .iter()
                .filter_map(|record| record.callbacks.clone())
                .collect(),
        )
    }

    /// Take the plugin's free function, leaving it on the stack.
    pub fn take_free(&mut self, id: PluginId) -> Option<FreeFn> {
        self.record_mut(id)?.free.take()
    }

    /// Remove an active plugin from the stack.
    pub fn remove(&mut self, id: PluginId) -> bool {
        let Some(i) = self.index.remove(&id) else {
            return false;
        };
        self.stack.remove(i);
        for (pos, record) in self.stack.iter().enumerate().skip(i) {
            self.index.insert(record.id, pos);
        }
        true
    }
}
