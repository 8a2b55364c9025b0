use std::collections::BTreeMap;

use crate::map::surface::{EventKind, Listener, RenderingSurface};

/// A handler attached (or waiting to be attached) to one layer for one event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerEntry {
    pub event: EventKind,
    pub layer_id: String,
    pub listener: Listener,
}

impl ListenerEntry {
    pub fn new(event: EventKind, layer_id: impl Into<String>, listener: Listener) -> Self {
        Self {
            event,
            layer_id: layer_id.into(),
            listener,
        }
    }
}

/// Every handler currently attached to the live surface, keyed event -> layer -> handlers.
/// Empty intermediate maps are pruned on removal.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    by_event: BTreeMap<EventKind, BTreeMap<String, Vec<Listener>>>,
}

impl ListenerRegistry {
    /// Returns `false` if this exact handler was already tracked for the pair.
    pub fn track(&mut self, event: EventKind, layer_id: &str, listener: &Listener) -> bool {
        let handlers = self
            .by_event
            .entry(event)
            .or_default()
            .entry(layer_id.to_owned())
            .or_default();
        if handlers.contains(listener) {
            return false;
        }
        handlers.push(listener.clone());
        true
    }

    /// Idempotent. Returns whether the handler was tracked.
    pub fn untrack(&mut self, event: EventKind, layer_id: &str, listener: &Listener) -> bool {
        let Some(layers) = self.by_event.get_mut(&event) else {
            return false;
        };
        let Some(handlers) = layers.get_mut(layer_id) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|h| h != listener);
        let removed = handlers.len() != before;

        if handlers.is_empty() {
            layers.remove(layer_id);
        }
        if layers.is_empty() {
            self.by_event.remove(&event);
        }
        removed
    }

    #[cfg(test)]
    pub fn contains(&self, event: EventKind, layer_id: &str, listener: &Listener) -> bool {
        self.by_event
            .get(&event)
            .and_then(|layers| layers.get(layer_id))
            .is_some_and(|handlers| handlers.contains(listener))
    }

    pub fn len(&self) -> usize {
        self.by_event
            .values()
            .flat_map(|layers| layers.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_event.is_empty()
    }

    #[cfg(test)]
    /// Number of distinct (event, layer) pairs with at least one handler.
    pub fn pair_count(&self) -> usize {
        self.by_event.values().map(BTreeMap::len).sum()
    }

    /// Detaches every tracked handler from `surface` and empties the registry.
    pub fn detach_all<S: RenderingSurface + ?Sized>(&mut self, surface: &S) -> usize {
        let mut detached = 0;
        for (event, layers) in std::mem::take(&mut self.by_event) {
            for (layer_id, handlers) in layers {
                for handler in handlers {
                    surface.off(event, &layer_id, &handler);
                    detached += 1;
                }
            }
        }
        detached
    }
}
