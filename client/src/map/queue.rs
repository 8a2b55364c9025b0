use std::collections::BTreeSet;

use tracing::debug;

use crate::map::listeners::{ListenerEntry, ListenerRegistry};
use crate::map::surface::{LayerSpec, RenderingSurface, SourceSpec};

/// Commands issued before the surface is ready, replayed in dependency order
/// (sources, then layers, then listeners) once it is.
#[derive(Debug, Default)]
pub struct CommandQueue {
    sources: Vec<SourceSpec>,
    layers: Vec<LayerSpec>,
    listeners: Vec<ListenerEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingCounts {
    pub sources: usize,
    pub layers: usize,
    pub listeners: usize,
}

impl PendingCounts {
    pub fn is_empty(&self) -> bool {
        self.sources == 0 && self.layers == 0 && self.listeners == 0
    }
}

impl CommandQueue {
    /// A newer declaration for the same id takes the older one's slot.
    pub fn push_source(&mut self, source: SourceSpec) {
        match self.sources.iter_mut().find(|s| s.id == source.id) {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
    }

    pub fn push_layer(&mut self, layer: LayerSpec) {
        match self.layers.iter_mut().find(|l| l.id == layer.id) {
            Some(existing) => *existing = layer,
            None => self.layers.push(layer),
        }
    }

    /// Returns `false` if the identical entry is already queued.
    pub fn push_listener(&mut self, entry: ListenerEntry) -> bool {
        if self.listeners.contains(&entry) {
            return false;
        }
        self.listeners.push(entry);
        true
    }

    pub fn remove_source(&mut self, id: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        self.sources.len() != before
    }

    pub fn remove_layer(&mut self, id: &str) -> bool {
        let before = self.layers.len();
        self.layers.retain(|l| l.id != id);
        self.layers.len() != before
    }

    pub fn remove_listener(&mut self, entry: &ListenerEntry) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|e| e != entry);
        self.listeners.len() != before
    }

    pub fn has_source(&self, id: &str) -> bool {
        self.sources.iter().any(|s| s.id == id)
    }

    pub fn counts(&self) -> PendingCounts {
        PendingCounts {
            sources: self.sources.len(),
            layers: self.layers.len(),
            listeners: self.listeners.len(),
        }
    }

    pub fn clear(&mut self) {
        self.sources.clear();
        self.layers.clear();
        self.listeners.clear();
    }
}

/// Sources and layers this controller put on the current surface.
#[derive(Debug, Default)]
pub struct Artifacts {
    sources: BTreeSet<String>,
    layers: BTreeSet<String>,
}

impl Artifacts {
    pub fn has_source(&self, id: &str) -> bool {
        self.sources.contains(id)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(String::as_str)
    }

    pub fn layers(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(String::as_str)
    }

    pub fn forget_source(&mut self, id: &str) -> bool {
        self.sources.remove(id)
    }

    pub fn forget_layer(&mut self, id: &str) -> bool {
        self.layers.remove(id)
    }

    /// Removes layers before sources, since a source cannot be dropped while a layer
    /// still draws it. Returns `(layers, sources)` actually removed from the surface.
    pub fn remove_all<S: RenderingSurface + ?Sized>(&mut self, surface: &S) -> (usize, usize) {
        let mut layers = 0;
        for id in std::mem::take(&mut self.layers) {
            if surface.has_layer(&id) {
                surface.remove_layer(&id);
                layers += 1;
            }
        }
        let mut sources = 0;
        for id in std::mem::take(&mut self.sources) {
            if surface.has_source(&id) {
                surface.remove_source(&id);
                sources += 1;
            }
        }
        (layers, sources)
    }
}

/// Remove-then-add, so a re-registration replaces rather than duplicates.
pub fn apply_source<S: RenderingSurface + ?Sized>(
    surface: &S,
    source: &SourceSpec,
    artifacts: &mut Artifacts,
) {
    if surface.has_source(&source.id) {
        surface.remove_source(&source.id);
    }
    surface.add_source(source);
    artifacts.sources.insert(source.id.clone());
}

pub fn apply_layer<S: RenderingSurface + ?Sized>(
    surface: &S,
    layer: &LayerSpec,
    artifacts: &mut Artifacts,
) {
    if surface.has_layer(&layer.id) {
        surface.remove_layer(&layer.id);
    }
    surface.add_layer(layer);
    artifacts.layers.insert(layer.id.clone());
}

/// Attaches and tracks; skipped when the identical handler is already tracked.
pub fn apply_listener<S: RenderingSurface + ?Sized>(
    surface: &S,
    entry: &ListenerEntry,
    registry: &mut ListenerRegistry,
) -> bool {
    if !registry.track(entry.event, &entry.layer_id, &entry.listener) {
        return false;
    }
    surface.on(entry.event, &entry.layer_id, &entry.listener);
    true
}

/// Drains the queue against a ready surface.
pub fn replay<S: RenderingSurface + ?Sized>(
    surface: &S,
    queue: &mut CommandQueue,
    artifacts: &mut Artifacts,
    registry: &mut ListenerRegistry,
) -> PendingCounts {
    let mut applied = PendingCounts::default();

    for source in std::mem::take(&mut queue.sources) {
        apply_source(surface, &source, artifacts);
        applied.sources += 1;
    }
    for layer in std::mem::take(&mut queue.layers) {
        apply_layer(surface, &layer, artifacts);
        applied.layers += 1;
    }
    for entry in std::mem::take(&mut queue.listeners) {
        if apply_listener(surface, &entry, registry) {
            applied.listeners += 1;
        }
    }

    debug!(
        sources = applied.sources,
        layers = applied.layers,
        listeners = applied.listeners,
        "replayed queued map commands"
    );
    applied
}
