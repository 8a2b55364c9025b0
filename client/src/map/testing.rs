//! Native stand-ins for the browser engine and network, used by unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use tradhelm_shared::{BBox, FeatureId};

use crate::map::error::LoadError;
use crate::map::loader::{FeatureFetcher, FetchResponse};
use crate::map::surface::{
    EventKind, FeatureHit, FeatureState, FitOptions, LayerSpec, Listener, LoadCallback, MapEvent,
    RenderingSurface, ScreenPoint, SourceSpec,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    AddSource(String),
    RemoveSource(String),
    AddLayer(String),
    RemoveLayer(String),
    On(EventKind, String),
    Off(EventKind, String),
}

/// Records every structural call in order and keeps enough live state to answer
/// `has_*` queries the way the engine would.
#[derive(Default)]
pub(crate) struct RecordingSurface {
    loaded: Cell<bool>,
    calls: RefCell<Vec<Call>>,
    sources: RefCell<Vec<SourceSpec>>,
    layers: RefCell<Vec<LayerSpec>>,
    handlers: RefCell<Vec<(EventKind, String, Listener)>>,
    load_callbacks: RefCell<Vec<LoadCallback>>,
    feature_state: RefCell<BTreeMap<(String, FeatureId), FeatureState>>,
    state_writes: Cell<usize>,
    hits: RefCell<Vec<FeatureHit>>,
    fits: RefCell<Vec<(BBox, FitOptions)>>,
}

impl RecordingSurface {
    pub(crate) fn loading() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn loaded() -> Rc<Self> {
        let surface = Self::default();
        surface.loaded.set(true);
        Rc::new(surface)
    }

    /// Fires the engine's "load" event to whoever is subscribed right now.
    pub(crate) fn fire_load(&self) {
        self.loaded.set(true);
        let callbacks = self.load_callbacks.borrow().clone();
        for callback in callbacks {
            callback();
        }
    }

    pub(crate) fn load_subscribers(&self) -> usize {
        self.load_callbacks.borrow().len()
    }

    /// Delivers a user event to the handlers attached for `(kind, layer_id)`.
    pub(crate) fn emit(&self, kind: EventKind, layer_id: &str, features: Vec<FeatureHit>) -> usize {
        let event = MapEvent {
            kind,
            layer_id: layer_id.to_owned(),
            point: ScreenPoint::default(),
            lng_lat: [0.0, 0.0],
            features,
        };
        let targets: Vec<Listener> = self
            .handlers
            .borrow()
            .iter()
            .filter(|(k, layer, _)| *k == kind && layer == layer_id)
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in &targets {
            listener.call(&event);
        }
        targets.len()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub(crate) fn source_ids(&self) -> Vec<String> {
        self.sources.borrow().iter().map(|s| s.id.clone()).collect()
    }

    pub(crate) fn source(&self, id: &str) -> Option<SourceSpec> {
        self.sources.borrow().iter().find(|s| s.id == id).cloned()
    }

    pub(crate) fn layer_ids(&self) -> Vec<String> {
        self.layers.borrow().iter().map(|l| l.id.clone()).collect()
    }

    pub(crate) fn handler_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub(crate) fn state_of(&self, source: &str, id: &FeatureId) -> Option<FeatureState> {
        self.feature_state
            .borrow()
            .get(&(source.to_owned(), id.clone()))
            .copied()
    }

    pub(crate) fn stateful_features(&self, source: &str) -> usize {
        self.feature_state
            .borrow()
            .keys()
            .filter(|(s, _)| s == source)
            .count()
    }

    pub(crate) fn state_writes(&self) -> usize {
        self.state_writes.get()
    }

    pub(crate) fn set_hits(&self, hits: Vec<FeatureHit>) {
        *self.hits.borrow_mut() = hits;
    }

    pub(crate) fn fits(&self) -> Vec<(BBox, FitOptions)> {
        self.fits.borrow().clone()
    }
}

impl RenderingSurface for RecordingSurface {
    fn is_loaded(&self) -> bool {
        self.loaded.get()
    }

    fn on_load(&self, callback: &LoadCallback) {
        self.load_callbacks.borrow_mut().push(Rc::clone(callback));
    }

    fn off_load(&self, callback: &LoadCallback) {
        self.load_callbacks
            .borrow_mut()
            .retain(|cb| !Rc::ptr_eq(cb, callback));
    }

    fn has_source(&self, id: &str) -> bool {
        self.sources.borrow().iter().any(|s| s.id == id)
    }

    fn add_source(&self, source: &SourceSpec) {
        assert!(!self.has_source(&source.id), "duplicate source {}", source.id);
        self.calls
            .borrow_mut()
            .push(Call::AddSource(source.id.clone()));
        self.sources.borrow_mut().push(source.clone());
    }

    fn remove_source(&self, id: &str) {
        assert!(self.has_source(id), "removing absent source {id}");
        self.calls.borrow_mut().push(Call::RemoveSource(id.to_owned()));
        self.sources.borrow_mut().retain(|s| s.id != id);
    }

    fn has_layer(&self, id: &str) -> bool {
        self.layers.borrow().iter().any(|l| l.id == id)
    }

    fn add_layer(&self, layer: &LayerSpec) {
        assert!(!self.has_layer(&layer.id), "duplicate layer {}", layer.id);
        assert!(
            self.has_source(&layer.source),
            "layer {} added before source {}",
            layer.id,
            layer.source
        );
        self.calls.borrow_mut().push(Call::AddLayer(layer.id.clone()));
        self.layers.borrow_mut().push(layer.clone());
    }

    fn remove_layer(&self, id: &str) {
        assert!(self.has_layer(id), "removing absent layer {id}");
        self.calls.borrow_mut().push(Call::RemoveLayer(id.to_owned()));
        self.layers.borrow_mut().retain(|l| l.id != id);
    }

    fn on(&self, event: EventKind, layer_id: &str, listener: &Listener) {
        self.calls
            .borrow_mut()
            .push(Call::On(event, layer_id.to_owned()));
        self.handlers
            .borrow_mut()
            .push((event, layer_id.to_owned(), listener.clone()));
    }

    fn off(&self, event: EventKind, layer_id: &str, listener: &Listener) {
        self.calls
            .borrow_mut()
            .push(Call::Off(event, layer_id.to_owned()));
        self.handlers
            .borrow_mut()
            .retain(|(k, layer, l)| !(*k == event && layer == layer_id && l == listener));
    }

    fn set_feature_state(&self, source: &str, id: &FeatureId, state: &FeatureState) {
        self.state_writes.set(self.state_writes.get() + 1);
        self.feature_state
            .borrow_mut()
            .entry((source.to_owned(), id.clone()))
            .or_default()
            .merge(state);
    }

    fn remove_feature_state(&self, source: &str, id: Option<&FeatureId>) {
        self.feature_state
            .borrow_mut()
            .retain(|(s, f), _| s != source || id.is_some_and(|id| id != f));
    }

    fn query_rendered_features(&self, _point: ScreenPoint, layers: &[&str]) -> Vec<FeatureHit> {
        self.hits
            .borrow()
            .iter()
            .filter(|hit| {
                layers.is_empty()
                    || hit
                        .layer
                        .as_deref()
                        .is_some_and(|layer| layers.contains(&layer))
            })
            .cloned()
            .collect()
    }

    fn fit_bounds(&self, bbox: BBox, options: &FitOptions) {
        self.fits.borrow_mut().push((bbox, *options));
    }

    fn remove(&self) {
        self.load_callbacks.borrow_mut().clear();
        self.handlers.borrow_mut().clear();
    }
}

/// Fetcher whose responses are delivered by the test, one request at a time per URL.
#[derive(Clone, Default)]
pub(crate) struct ScriptedFetcher {
    pending: Rc<RefCell<HashMap<String, Vec<oneshot::Sender<Result<FetchResponse, LoadError>>>>>>,
    requests: Rc<RefCell<HashMap<String, usize>>>,
}

impl ScriptedFetcher {
    pub(crate) fn request_count(&self, url: &str) -> usize {
        self.requests.borrow().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn respond(&self, url: &str, status: u16, body: &str) {
        self.complete(
            url,
            Ok(FetchResponse {
                status,
                body: body.to_owned(),
            }),
        );
    }

    pub(crate) fn fail(&self, url: &str, message: &str) {
        self.complete(
            url,
            Err(LoadError::Network {
                url: url.to_owned(),
                message: message.to_owned(),
            }),
        );
    }

    fn complete(&self, url: &str, result: Result<FetchResponse, LoadError>) {
        let sender = self
            .pending
            .borrow_mut()
            .get_mut(url)
            .filter(|senders| !senders.is_empty())
            .map(|senders| senders.remove(0))
            .unwrap_or_else(|| panic!("no outstanding request for {url}"));
        let _ = sender.send(result);
    }
}

impl FeatureFetcher for ScriptedFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<FetchResponse, LoadError>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .borrow_mut()
            .entry(url.to_owned())
            .or_default()
            .push(tx);
        *self.requests.borrow_mut().entry(url.to_owned()).or_default() += 1;

        let url = url.to_owned();
        async move {
            rx.await.unwrap_or_else(|_| {
                Err(LoadError::Network {
                    url,
                    message: "request dropped".into(),
                })
            })
        }
        .boxed_local()
    }
}
