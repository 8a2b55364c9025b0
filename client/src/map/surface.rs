//! Capability set consumed from the rendering engine.
//!
//! The controller never draws anything itself. It only registers sources, layers and
//! event handlers on a [`RenderingSurface`] and pushes per-feature state onto it. The
//! browser implementation lives in [`crate::map::maplibre`]; tests use a recording
//! double.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tradhelm_shared::{BBox, Building, FeatureCollection, FeatureId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Click,
    MouseMove,
    MouseLeave,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::MouseMove => "mousemove",
            EventKind::MouseLeave => "mouseleave",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

/// A rendered feature under the pointer, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureHit {
    pub id: Option<FeatureId>,
    pub layer: Option<String>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapEvent {
    pub kind: EventKind,
    pub layer_id: String,
    pub point: ScreenPoint,
    /// `[lng, lat]` under the pointer.
    pub lng_lat: [f64; 2],
    pub features: Vec<FeatureHit>,
}

impl MapEvent {
    pub fn first_feature_id(&self) -> Option<&FeatureId> {
        self.features.iter().find_map(|hit| hit.id.as_ref())
    }
}

/// Event handler with identity semantics: two `Listener`s are equal only when they are
/// clones of the same handler, so the same closure can be attached and detached again.
#[derive(Clone)]
pub struct Listener(Rc<dyn Fn(&MapEvent)>);

impl Listener {
    pub fn new(handler: impl Fn(&MapEvent) + 'static) -> Self {
        Self(Rc::new(handler))
    }

    pub fn call(&self, event: &MapEvent) {
        (self.0)(event);
    }

    /// Stable address of the underlying handler.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Listener {}

impl Hash for Listener {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:#x})", self.id())
    }
}

/// Callback for the engine's one-shot "fully loaded" signal.
pub type LoadCallback = Rc<dyn Fn()>;

/// GeoJSON data source declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub id: String,
    pub data: Rc<FeatureCollection>,
    /// Feature property the engine should use as feature id (needed for string ids).
    pub promote_id: Option<String>,
}

impl SourceSpec {
    pub fn new(id: impl Into<String>, data: Rc<FeatureCollection>) -> Self {
        Self {
            id: id.into(),
            data,
            promote_id: None,
        }
    }

    pub fn with_promote_id(mut self, property: impl Into<String>) -> Self {
        self.promote_id = Some(property.into());
        self
    }

    /// Engine-facing source object (the id is passed separately).
    pub fn to_json(&self) -> Value {
        let mut source = json!({
            "type": "geojson",
            "data": &*self.data,
        });
        if let Some(promote_id) = &self.promote_id {
            source["promoteId"] = Value::String(promote_id.clone());
        }
        source
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Fill,
    Line,
    Circle,
    Symbol,
}

/// Visual layer declaration, serialized as the engine's layer object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LayerKind,
    pub source: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub paint: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub layout: Map<String, Value>,
}

impl LayerSpec {
    pub fn new(id: impl Into<String>, kind: LayerKind, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            source: source.into(),
            paint: Map::new(),
            layout: Map::new(),
        }
    }

    pub fn paint(mut self, property: &str, value: Value) -> Self {
        self.paint.insert(property.to_owned(), value);
        self
    }

    pub fn layout(mut self, property: &str, value: Value) -> Self {
        self.layout.insert(property.to_owned(), value);
        self
    }
}

/// Per-feature state patch. Unset flags are left untouched by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FeatureState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hovered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded: Option<bool>,
    /// Structure drawn on the feature, stored under its wire name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building: Option<Building>,
}

impl FeatureState {
    /// Later patch wins for every flag it sets.
    pub fn merge(&mut self, patch: &FeatureState) {
        self.selected = patch.selected.or(self.selected);
        self.hovered = patch.hovered.or(self.hovered);
        self.loaded = patch.loaded.or(self.loaded);
        self.building = patch.building.or(self.building);
    }

    pub fn is_selected(&self) -> bool {
        self.selected.unwrap_or(false)
    }

    pub fn is_hovered(&self) -> bool {
        self.hovered.unwrap_or(false)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub padding: f64,
    pub duration_ms: u32,
}

/// The externally owned rendering engine instance.
///
/// Teardown helpers in the controller check `has_source`/`has_layer` before removing,
/// so implementations may treat removal of an absent id as a caller bug.
pub trait RenderingSurface {
    fn is_loaded(&self) -> bool;
    fn on_load(&self, callback: &LoadCallback);
    fn off_load(&self, callback: &LoadCallback);

    fn has_source(&self, id: &str) -> bool;
    fn add_source(&self, source: &SourceSpec);
    fn remove_source(&self, id: &str);

    fn has_layer(&self, id: &str) -> bool;
    fn add_layer(&self, layer: &LayerSpec);
    fn remove_layer(&self, id: &str);

    fn on(&self, event: EventKind, layer_id: &str, listener: &Listener);
    fn off(&self, event: EventKind, layer_id: &str, listener: &Listener);

    fn set_feature_state(&self, source: &str, id: &FeatureId, state: &FeatureState);
    /// Clears one feature's state, or every feature of `source` when `id` is `None`.
    fn remove_feature_state(&self, source: &str, id: Option<&FeatureId>);

    fn query_rendered_features(&self, point: ScreenPoint, layers: &[&str]) -> Vec<FeatureHit>;
    fn fit_bounds(&self, bbox: BBox, options: &FitOptions);

    /// Destroys the engine instance.
    fn remove(&self);
}
