//! Input context table with lowest-free-id reuse.

use std::collections::BTreeSet;

use super::InputContext;
use crate::socket::client_conn::ClientId;

/// Growable table of input contexts indexed by small integer id.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    slots: Vec<Option<InputContext>>,
    free: BTreeSet<usize>,
}

impl ContextRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context owned by `client` under the lowest free id.
    pub fn register(&mut self, client: ClientId, enabled: bool) -> usize {
        let id = match self.free.pop_first() {
            Some(id) => id,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        self.slots[id] = Some(InputContext::new(id, client, enabled));
        id
    }

    /// Destroy a context, freeing its id.
    pub fn remove(&mut self, id: usize) -> Option<InputContext> {
        let ctx = self.slots.get_mut(id)?.take()?;
        self.free.insert(id);
        // Keep the table short when the tail empties.
        while matches!(self.slots.last(), Some(None)) {
            let tail = self.slots.len() - 1;
            self.free.remove(&tail);
            self.slots.pop();
        }
        Some(ctx)
    }

    /// Look up a context.
    pub fn get(&self, id: usize) -> Option<&InputContext> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    /// Look up a context mutably.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut InputContext> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: usize) -> bool {
        self.get(id).is_some()
    }

    /// Ids of the contexts `client` owns, ascending.
    pub fn owned_by(&self, client: ClientId) -> Vec<usize> {
        self.iter()
            .filter(|ctx| ctx.client == client)
            .map(|ctx| ctx.id)
            .collect()
    }

    /// Every live id, ascending.
    pub fn ids(&self) -> Vec<usize> {
        self.iter().map(|ctx| ctx.id).collect()
    }

    /// Every live context.
    pub fn iter(&self) -> impl Iterator<Item = &InputContext> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Every live context, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut InputContext> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether no context is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
