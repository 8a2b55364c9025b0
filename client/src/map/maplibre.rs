//! [`RenderingSurface`] backed by a `maplibregl.Map` loaded from the page.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use js_sys::{Array, Function, Object, Reflect};
use serde::Serialize;
use tracing::{debug, warn};
use tradhelm_shared::{BBox, FeatureId};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

use crate::map::surface::{
    EventKind, FeatureHit, FeatureState, FitOptions, LayerSpec, Listener, LoadCallback, MapEvent,
    RenderingSurface, ScreenPoint, SourceSpec,
};

pub const STYLE_URL: &str = "https://demotiles.maplibre.org/style.json";
pub const INITIAL_CENTER: [f64; 2] = [0.0, 20.0];
pub const INITIAL_ZOOM: f64 = 4.0;

#[wasm_bindgen(js_namespace = maplibregl)]
extern "C" {
    #[wasm_bindgen(js_name = Map)]
    type JsMap;

    #[wasm_bindgen(constructor, js_class = "Map", catch)]
    fn new(options: &JsValue) -> Result<JsMap, JsValue>;

    #[wasm_bindgen(method, js_class = "Map", js_name = isStyleLoaded)]
    fn is_style_loaded(this: &JsMap) -> JsValue;

    #[wasm_bindgen(method, js_class = "Map", js_name = getSource)]
    fn get_source(this: &JsMap, id: &str) -> JsValue;

    #[wasm_bindgen(method, js_class = "Map", js_name = addSource, catch)]
    fn add_source(this: &JsMap, id: &str, source: &JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, js_class = "Map", js_name = removeSource, catch)]
    fn remove_source(this: &JsMap, id: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, js_class = "Map", js_name = getLayer)]
    fn get_layer(this: &JsMap, id: &str) -> JsValue;

    #[wasm_bindgen(method, js_class = "Map", js_name = addLayer, catch)]
    fn add_layer(this: &JsMap, layer: &JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, js_class = "Map", js_name = removeLayer, catch)]
    fn remove_layer(this: &JsMap, id: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, js_class = "Map", js_name = on)]
    fn on_map(this: &JsMap, event: &str, listener: &Function);

    #[wasm_bindgen(method, js_class = "Map", js_name = off)]
    fn off_map(this: &JsMap, event: &str, listener: &Function);

    #[wasm_bindgen(method, js_class = "Map", js_name = on)]
    fn on_layer(this: &JsMap, event: &str, layer_id: &str, listener: &Function);

    #[wasm_bindgen(method, js_class = "Map", js_name = off)]
    fn off_layer(this: &JsMap, event: &str, layer_id: &str, listener: &Function);

    #[wasm_bindgen(method, js_class = "Map", js_name = setFeatureState)]
    fn set_feature_state(this: &JsMap, target: &JsValue, state: &JsValue);

    #[wasm_bindgen(method, js_class = "Map", js_name = removeFeatureState)]
    fn remove_feature_state(this: &JsMap, target: &JsValue);

    #[wasm_bindgen(method, js_class = "Map", js_name = queryRenderedFeatures)]
    fn query_rendered_features(this: &JsMap, point: &JsValue, options: &JsValue) -> Array;

    #[wasm_bindgen(method, js_class = "Map", js_name = fitBounds)]
    fn fit_bounds(this: &JsMap, bounds: &JsValue, options: &JsValue);

    #[wasm_bindgen(method, js_class = "Map")]
    fn remove(this: &JsMap);
}

type JsHandler = Closure<dyn Fn(JsValue)>;

/// Values detached while possibly still on the JS stack, held until a flush.
struct Retired<H> {
    pending: RefCell<Vec<H>>,
}

impl<H> Retired<H> {
    fn new() -> Self {
        Self {
            pending: RefCell::new(Vec::new()),
        }
    }

    /// Returns `true` when this is the first value since the last flush, i.e.
    /// the caller has to schedule one.
    fn push(&self, value: H) -> bool {
        let mut pending = self.pending.borrow_mut();
        pending.push(value);
        pending.len() == 1
    }

    fn flush(&self) -> usize {
        let freed = std::mem::take(&mut *self.pending.borrow_mut());
        freed.len()
    }
}

/// A live MapLibre map. Created against a container element; destroyed by
/// [`RenderingSurface::remove`].
pub struct MapLibreSurface {
    map: JsMap,
    handlers: RefCell<HashMap<(EventKind, String, usize), JsHandler>>,
    load_handlers: RefCell<Vec<(LoadCallback, JsHandler)>>,
    /// Freed by a queued microtask once the stack unwinds.
    retired: Rc<Retired<JsHandler>>,
}

impl MapLibreSurface {
    pub fn mount(container: &web_sys::HtmlElement) -> Result<Rc<Self>, JsValue> {
        let options = Object::new();
        Reflect::set(&options, &"container".into(), container)?;
        Reflect::set(&options, &"style".into(), &STYLE_URL.into())?;
        Reflect::set(&options, &"center".into(), &to_js(&INITIAL_CENTER)?)?;
        Reflect::set(&options, &"zoom".into(), &INITIAL_ZOOM.into())?;
        Reflect::set(&options, &"attributionControl".into(), &JsValue::FALSE)?;

        let map = JsMap::new(&options)?;
        debug!(style = STYLE_URL, "maplibre map created");
        Ok(Rc::new(Self {
            map,
            handlers: RefCell::new(HashMap::new()),
            load_handlers: RefCell::new(Vec::new()),
            retired: Rc::new(Retired::new()),
        }))
    }

    fn retire(&self, handler: JsHandler) {
        if !self.retired.push(handler) {
            return;
        }
        let Some(window) = web_sys::window() else {
            return;
        };
        let retired = Rc::clone(&self.retired);
        let flush = Closure::once_into_js(move || {
            let freed = retired.flush();
            debug!(handlers = freed, "retired map handlers freed");
        });
        window.queue_microtask(flush.unchecked_ref::<Function>());
    }
}

impl RenderingSurface for MapLibreSurface {
    fn is_loaded(&self) -> bool {
        self.map.is_style_loaded().is_truthy()
    }

    fn on_load(&self, callback: &LoadCallback) {
        let cb = Rc::clone(callback);
        let handler: JsHandler = Closure::new(move |_: JsValue| cb());
        self.map.on_map("load", handler.as_ref().unchecked_ref());
        self.load_handlers
            .borrow_mut()
            .push((Rc::clone(callback), handler));
    }

    fn off_load(&self, callback: &LoadCallback) {
        let mut load_handlers = self.load_handlers.borrow_mut();
        let Some(pos) = load_handlers
            .iter()
            .position(|(cb, _)| Rc::ptr_eq(cb, callback))
        else {
            return;
        };
        let (_, handler) = load_handlers.remove(pos);
        drop(load_handlers);
        self.map.off_map("load", handler.as_ref().unchecked_ref());
        // Usually called from inside this very handler.
        self.retire(handler);
    }

    fn has_source(&self, id: &str) -> bool {
        !self.map.get_source(id).is_undefined()
    }

    fn add_source(&self, source: &SourceSpec) {
        let result = to_js(&source.to_json()).and_then(|js| self.map.add_source(&source.id, &js));
        if let Err(e) = result {
            warn!(source = %source.id, error = ?e, "maplibre rejected source");
        }
    }

    fn remove_source(&self, id: &str) {
        if let Err(e) = self.map.remove_source(id) {
            warn!(source = id, error = ?e, "maplibre failed to remove source");
        }
    }

    fn has_layer(&self, id: &str) -> bool {
        !self.map.get_layer(id).is_undefined()
    }

    fn add_layer(&self, layer: &LayerSpec) {
        let result = to_js(layer).and_then(|js| self.map.add_layer(&js));
        if let Err(e) = result {
            warn!(layer = %layer.id, error = ?e, "maplibre rejected layer");
        }
    }

    fn remove_layer(&self, id: &str) {
        if let Err(e) = self.map.remove_layer(id) {
            warn!(layer = id, error = ?e, "maplibre failed to remove layer");
        }
    }

    fn on(&self, event: EventKind, layer_id: &str, listener: &Listener) {
        let key = (event, layer_id.to_owned(), listener.id());
        if self.handlers.borrow().contains_key(&key) {
            return;
        }
        let listener = listener.clone();
        let layer = layer_id.to_owned();
        let handler: JsHandler = Closure::new(move |raw: JsValue| {
            listener.call(&parse_event(event, &layer, &raw));
        });
        self.map
            .on_layer(event.as_str(), layer_id, handler.as_ref().unchecked_ref());
        self.handlers.borrow_mut().insert(key, handler);
    }

    fn off(&self, event: EventKind, layer_id: &str, listener: &Listener) {
        let key = (event, layer_id.to_owned(), listener.id());
        let Some(handler) = self.handlers.borrow_mut().remove(&key) else {
            return;
        };
        self.map
            .off_layer(event.as_str(), layer_id, handler.as_ref().unchecked_ref());
        self.retire(handler);
    }

    fn set_feature_state(&self, source: &str, id: &FeatureId, state: &FeatureState) {
        match (feature_target(source, Some(id)), to_js(state)) {
            (Ok(target), Ok(state)) => self.map.set_feature_state(&target, &state),
            (Err(e), _) | (_, Err(e)) => {
                warn!(source, id = %id, error = ?e, "feature state not applied");
            }
        }
    }

    fn remove_feature_state(&self, source: &str, id: Option<&FeatureId>) {
        match feature_target(source, id) {
            Ok(target) => self.map.remove_feature_state(&target),
            Err(e) => warn!(source, error = ?e, "feature state not cleared"),
        }
    }

    fn query_rendered_features(&self, point: ScreenPoint, layers: &[&str]) -> Vec<FeatureHit> {
        let options = Object::new();
        if !layers.is_empty() {
            let ids: Array = layers.iter().map(|l| JsValue::from_str(l)).collect();
            let _ = Reflect::set(&options, &"layers".into(), &ids);
        }
        let point: Array = [point.x, point.y].iter().map(|v| JsValue::from(*v)).collect();
        self.map
            .query_rendered_features(&point, &options)
            .iter()
            .map(|raw| parse_hit(&raw))
            .collect()
    }

    fn fit_bounds(&self, bbox: BBox, options: &FitOptions) {
        let [west, south, east, north] = bbox;
        let bounds = to_js(&[[west, south], [east, north]]);
        let opts = to_js(&FitBoundsOptions {
            padding: options.padding,
            duration: options.duration_ms,
        });
        match (bounds, opts) {
            (Ok(bounds), Ok(opts)) => self.map.fit_bounds(&bounds, &opts),
            (Err(e), _) | (_, Err(e)) => warn!(error = ?e, "fit bounds skipped"),
        }
    }

    fn remove(&self) {
        for ((event, layer, _), handler) in self.handlers.borrow_mut().drain() {
            self.map
                .off_layer(event.as_str(), &layer, handler.as_ref().unchecked_ref());
        }
        for (_, handler) in self.load_handlers.borrow_mut().drain(..) {
            self.map.off_map("load", handler.as_ref().unchecked_ref());
        }
        self.map.remove();
        self.retired.flush();
        debug!("maplibre map removed");
    }
}

#[derive(Serialize)]
struct FitBoundsOptions {
    padding: f64,
    duration: u32,
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(JsValue::from)
}

fn feature_id_to_js(id: &FeatureId) -> JsValue {
    match id {
        FeatureId::Number(n) => n.as_f64().map_or(JsValue::NULL, JsValue::from),
        FeatureId::Text(text) => JsValue::from_str(text),
    }
}

fn feature_target(source: &str, id: Option<&FeatureId>) -> Result<JsValue, JsValue> {
    let target = Object::new();
    Reflect::set(&target, &"source".into(), &source.into())?;
    if let Some(id) = id {
        Reflect::set(&target, &"id".into(), &feature_id_to_js(id))?;
    }
    Ok(target.into())
}

fn get(value: &JsValue, key: &str) -> JsValue {
    Reflect::get(value, &JsValue::from_str(key)).unwrap_or(JsValue::UNDEFINED)
}

fn feature_id_from_js(value: &JsValue) -> Option<FeatureId> {
    if let Some(text) = value.as_string() {
        return Some(FeatureId::Text(text));
    }
    value.as_f64().and_then(FeatureId::from_f64)
}

fn parse_hit(raw: &JsValue) -> FeatureHit {
    let properties = serde_wasm_bindgen::from_value(get(raw, "properties")).unwrap_or_default();
    FeatureHit {
        id: feature_id_from_js(&get(raw, "id")),
        layer: get(&get(raw, "layer"), "id").as_string(),
        properties,
    }
}

fn parse_event(kind: EventKind, layer_id: &str, raw: &JsValue) -> MapEvent {
    let point = get(raw, "point");
    let lng_lat = get(raw, "lngLat");
    let features = get(raw, "features");
    let features = if Array::is_array(&features) {
        Array::from(&features).iter().map(|f| parse_hit(&f)).collect()
    } else {
        Vec::new()
    };
    MapEvent {
        kind,
        layer_id: layer_id.to_owned(),
        point: ScreenPoint {
            x: get(&point, "x").as_f64().unwrap_or_default(),
            y: get(&point, "y").as_f64().unwrap_or_default(),
        },
        lng_lat: [
            get(&lng_lat, "lng").as_f64().unwrap_or_default(),
            get(&lng_lat, "lat").as_f64().unwrap_or_default(),
        ],
        features,
    }
}
