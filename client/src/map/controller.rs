use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info, warn};
use tradhelm_shared::{BBox, FeatureCollection, FeatureId};

use crate::map::error::{LoadError, MapError, UsageError};
use crate::map::feature_state::{self, PresentationState};
use crate::map::listeners::{ListenerEntry, ListenerRegistry};
use crate::map::loader::FeatureLoader;
use crate::map::queue::{self, Artifacts, CommandQueue, PendingCounts};
use crate::map::surface::{
    EventKind, FeatureHit, FeatureState, FitOptions, LayerSpec, Listener, LoadCallback,
    RenderingSurface, ScreenPoint, SourceSpec,
};

pub const FIT_PADDING_PX: f64 = 32.0;
pub const FIT_DURATION_MS: u32 = 800;

/// Lifecycle of the attached surface. A surface that never signals readiness stays in
/// `Attaching` with every command queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Detached,
    Attaching,
    Ready,
}

/// Data for [`MapController::register_source`]: either the collection itself or the URL
/// to load it from.
#[derive(Debug, Clone)]
pub enum SourceData {
    Inline(Rc<FeatureCollection>),
    Remote(String),
}

impl From<FeatureCollection> for SourceData {
    fn from(value: FeatureCollection) -> Self {
        SourceData::Inline(Rc::new(value))
    }
}

impl From<Rc<FeatureCollection>> for SourceData {
    fn from(value: Rc<FeatureCollection>) -> Self {
        SourceData::Inline(value)
    }
}

impl From<&str> for SourceData {
    fn from(value: &str) -> Self {
        SourceData::Remote(value.to_owned())
    }
}

impl From<String> for SourceData {
    fn from(value: String) -> Self {
        SourceData::Remote(value)
    }
}

type ReadinessObserver = Rc<dyn Fn(bool)>;

struct ControllerState<S> {
    surface: Option<Rc<S>>,
    phase: Phase,
    /// Bumped per attached surface; stale "load" signals carry an older value.
    attach_epoch: u64,
    /// Bumped per teardown; async registrations that straddle one are dropped.
    teardowns: u64,
    load_callback: Option<LoadCallback>,
    queue: CommandQueue,
    artifacts: Artifacts,
    listeners: ListenerRegistry,
    observer: Option<ReadinessObserver>,
}

impl<S: RenderingSurface> ControllerState<S> {
    fn ready_surface(&self) -> Option<Rc<S>> {
        match self.phase {
            Phase::Ready => self.surface.clone(),
            Phase::Detached | Phase::Attaching => None,
        }
    }

    /// Strips everything this controller put on the current surface and forgets it.
    /// Pending commands are kept. Returns whether the surface had been ready.
    fn teardown(&mut self) -> bool {
        let was_ready = self.phase == Phase::Ready;
        self.phase = Phase::Detached;
        let Some(surface) = self.surface.take() else {
            return false;
        };

        if let Some(callback) = self.load_callback.take() {
            surface.off_load(&callback);
        }
        let listeners = self.listeners.detach_all(&*surface);
        let (layers, sources) = self.artifacts.remove_all(&*surface);
        self.teardowns += 1;

        info!(
            epoch = self.attach_epoch,
            listeners, layers, sources, "rendering surface torn down"
        );
        was_ready
    }
}

/// Owns the single attached rendering surface and everything registered on it.
///
/// Cheap to clone; clones share state. All calls are expected on one thread.
pub struct MapController<S: RenderingSurface + 'static> {
    state: Rc<RefCell<ControllerState<S>>>,
    loader: FeatureLoader,
}

impl<S: RenderingSurface + 'static> Clone for MapController<S> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
            loader: self.loader.clone(),
        }
    }
}

impl<S: RenderingSurface + 'static> MapController<S> {
    pub fn new(loader: FeatureLoader) -> Self {
        Self {
            state: Rc::new(RefCell::new(ControllerState {
                surface: None,
                phase: Phase::Detached,
                attach_epoch: 0,
                teardowns: 0,
                load_callback: None,
                queue: CommandQueue::default(),
                artifacts: Artifacts::default(),
                listeners: ListenerRegistry::default(),
                observer: None,
            })),
            loader,
        }
    }

    /// Called with `true` on every transition to `Ready` and `false` when a ready
    /// surface is torn down.
    pub fn set_readiness_observer(&self, observer: impl Fn(bool) + 'static) {
        self.state.borrow_mut().observer = Some(Rc::new(observer));
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == Phase::Ready
    }

    pub fn surface(&self) -> Option<Rc<S>> {
        self.state.borrow().surface.clone()
    }

    /// Attaches `surface`, or detaches with `None`.
    ///
    /// Re-attaching the current surface is a no-op. Any other change first tears down
    /// every source, layer and listener registered on the previous surface. Safe to
    /// call repeatedly with `None`.
    pub fn attach(&self, surface: Option<Rc<S>>) {
        let mut state = self.state.borrow_mut();
        let unchanged = match (&state.surface, &surface) {
            (Some(current), Some(next)) => Rc::ptr_eq(current, next),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }

        let lost_ready = state.teardown();
        let observer = state.observer.clone();

        let Some(surface) = surface else {
            drop(state);
            info!("rendering surface detached");
            notify(observer.as_ref(), lost_ready, false);
            return;
        };

        state.surface = Some(Rc::clone(&surface));
        state.phase = Phase::Attaching;
        state.attach_epoch += 1;
        let epoch = state.attach_epoch;
        info!(epoch, "rendering surface attached");

        if surface.is_loaded() {
            drop(state);
            notify(observer.as_ref(), lost_ready, false);
            Self::mark_ready(&self.state, epoch);
            return;
        }

        let weak = Rc::downgrade(&self.state);
        let callback: LoadCallback = Rc::new(move || {
            if let Some(state) = weak.upgrade() {
                Self::mark_ready(&state, epoch);
            }
        });
        state.load_callback = Some(Rc::clone(&callback));
        drop(state);

        notify(observer.as_ref(), lost_ready, false);
        surface.on_load(&callback);
    }

    /// `Attaching -> Ready` for the attachment identified by `epoch`; anything else is
    /// ignored, so a repeated or stale "load" signal cannot replay twice.
    fn mark_ready(cell: &RefCell<ControllerState<S>>, epoch: u64) {
        let mut state = cell.borrow_mut();
        if state.attach_epoch != epoch || state.phase != Phase::Attaching {
            return;
        }
        let Some(surface) = state.surface.clone() else {
            return;
        };

        if let Some(callback) = state.load_callback.take() {
            surface.off_load(&callback);
        }
        state.phase = Phase::Ready;

        let ControllerState {
            queue: pending,
            artifacts,
            listeners,
            ..
        } = &mut *state;
        let replayed = queue::replay(&*surface, pending, artifacts, listeners);
        info!(
            epoch,
            sources = replayed.sources,
            layers = replayed.layers,
            listeners = replayed.listeners,
            "rendering surface ready"
        );

        let observer = state.observer.clone();
        drop(state);
        notify(observer.as_ref(), true, true);
    }

    /// Detaches the surface and discards every pending command.
    pub fn reset(&self) {
        self.attach(None);
        self.state.borrow_mut().queue.clear();
    }

    /// Registers a GeoJSON source, loading it first when given a URL.
    ///
    /// A failed load leaves any existing source with this id untouched.
    pub async fn register_source(
        &self,
        id: &str,
        data: impl Into<SourceData>,
    ) -> Result<(), MapError> {
        self.register_source_with(id, data, None).await
    }

    /// Like [`register_source`](Self::register_source), promoting the given feature
    /// property to the engine-side feature id.
    pub async fn register_source_with(
        &self,
        id: &str,
        data: impl Into<SourceData>,
        promote_id: Option<&str>,
    ) -> Result<(), MapError> {
        let id = id.to_owned();
        let promote_id = promote_id.map(str::to_owned);
        let collection = match data.into() {
            SourceData::Inline(collection) => collection,
            SourceData::Remote(url) => self.load_for_source(&id, &url).await?,
        };

        let spec = SourceSpec::new(id, collection);
        self.apply_or_queue_source(match promote_id {
            Some(property) => spec.with_promote_id(property),
            None => spec,
        });
        Ok(())
    }

    async fn load_for_source(
        &self,
        id: &str,
        url: &str,
    ) -> Result<Rc<FeatureCollection>, MapError> {
        let teardowns = self.state.borrow().teardowns;
        let collection = self.loader.load(url).await?;

        if self.state.borrow().teardowns != teardowns {
            warn!(source = id, url, "surface detached during load; source dropped");
            return Err(UsageError::SurfaceDetached { id: id.to_owned() }.into());
        }
        Ok(collection)
    }

    fn apply_or_queue_source(&self, spec: SourceSpec) {
        let mut state = self.state.borrow_mut();
        match state.ready_surface() {
            Some(surface) => {
                queue::apply_source(&*surface, &spec, &mut state.artifacts);
                debug!(source = %spec.id, "source applied");
            }
            None => {
                debug!(source = %spec.id, "surface not ready; source queued");
                state.queue.push_source(spec);
            }
        }
    }

    /// Adds (or queues) a layer. Its source must already be registered or queued.
    pub fn add_layer(&self, layer: LayerSpec) -> Result<(), UsageError> {
        let mut state = self.state.borrow_mut();
        let ready = state.ready_surface();
        let known = state.artifacts.has_source(&layer.source)
            || state.queue.has_source(&layer.source)
            || ready.as_ref().is_some_and(|s| s.has_source(&layer.source));
        if !known {
            warn!(layer = %layer.id, source = %layer.source, "layer references unknown source");
            return Err(UsageError::UnknownSource {
                layer: layer.id,
                source_id: layer.source,
            });
        }

        match ready {
            Some(surface) => {
                queue::apply_layer(&*surface, &layer, &mut state.artifacts);
                debug!(layer = %layer.id, "layer applied");
            }
            None => {
                debug!(layer = %layer.id, "surface not ready; layer queued");
                state.queue.push_layer(layer);
            }
        }
        Ok(())
    }

    /// Removes a layer whether queued or applied. Idempotent.
    pub fn remove_layer(&self, id: &str) {
        let mut state = self.state.borrow_mut();
        state.queue.remove_layer(id);
        if let Some(surface) = state.surface.clone()
            && surface.has_layer(id)
        {
            surface.remove_layer(id);
        }
        state.artifacts.forget_layer(id);
    }

    /// Removes a source whether queued or applied. Idempotent.
    pub fn remove_source(&self, id: &str) {
        let mut state = self.state.borrow_mut();
        state.queue.remove_source(id);
        if let Some(surface) = state.surface.clone()
            && surface.has_source(id)
        {
            surface.remove_source(id);
        }
        state.artifacts.forget_source(id);
    }

    /// Attaches (or queues) an event handler for one layer.
    pub fn on(&self, event: EventKind, layer_id: &str, listener: &Listener) {
        let mut state = self.state.borrow_mut();
        let entry = ListenerEntry::new(event, layer_id, listener.clone());
        match state.ready_surface() {
            Some(surface) => {
                queue::apply_listener(&*surface, &entry, &mut state.listeners);
            }
            None => {
                state.queue.push_listener(entry);
            }
        }
    }

    /// Detaches a handler whether queued or attached. Idempotent.
    pub fn off(&self, event: EventKind, layer_id: &str, listener: &Listener) {
        let mut state = self.state.borrow_mut();
        let entry = ListenerEntry::new(event, layer_id, listener.clone());
        state.queue.remove_listener(&entry);
        if state.listeners.untrack(event, layer_id, listener)
            && let Some(surface) = state.ready_surface()
        {
            surface.off(event, layer_id, listener);
        }
    }

    pub fn fit_to_bounds(&self, bbox: BBox) {
        let Some(surface) = self.surface() else {
            return;
        };
        surface.fit_bounds(
            bbox,
            &FitOptions {
                padding: FIT_PADDING_PX,
                duration_ms: FIT_DURATION_MS,
            },
        );
    }

    pub fn set_feature_state(&self, source: &str, id: &FeatureId, state: &FeatureState) {
        if let Some(surface) = self.surface() {
            surface.set_feature_state(source, id, state);
        }
    }

    pub fn query_rendered_features(&self, point: ScreenPoint, layers: &[&str]) -> Vec<FeatureHit> {
        let surface = self.state.borrow().ready_surface();
        surface
            .map(|surface| surface.query_rendered_features(point, layers))
            .unwrap_or_default()
    }

    /// Pushes selection/hover/loaded flags onto `source_id`. A no-op (returning `false`)
    /// until the surface is ready and the source has been applied to it.
    pub fn sync_presentation(&self, source_id: &str, presentation: &PresentationState) -> bool {
        let surface = {
            let state = self.state.borrow();
            if !state.artifacts.has_source(source_id) {
                return false;
            }
            state.ready_surface()
        };
        let Some(surface) = surface else {
            return false;
        };
        feature_state::reconcile(&*surface, source_id, presentation);
        true
    }

    pub async fn load(&self, url: &str) -> Result<Rc<FeatureCollection>, LoadError> {
        self.loader.load(url).await
    }

    pub fn cached(&self, url: &str) -> Option<Rc<FeatureCollection>> {
        self.loader.cached(url)
    }

    pub fn registered_sources(&self) -> Vec<String> {
        self.state
            .borrow()
            .artifacts
            .sources()
            .map(str::to_owned)
            .collect()
    }

    pub fn registered_layers(&self) -> Vec<String> {
        self.state
            .borrow()
            .artifacts
            .layers()
            .map(str::to_owned)
            .collect()
    }

    pub fn tracked_listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }

    pub fn pending(&self) -> PendingCounts {
        self.state.borrow().queue.counts()
    }
}

fn notify(observer: Option<&ReadinessObserver>, fire: bool, ready: bool) {
    if fire && let Some(observer) = observer {
        observer(ready);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use futures::executor::LocalPool;
    use futures::task::LocalSpawnExt;
    use tradhelm_shared::{Feature, Geometry};

    use super::*;
    use crate::map::surface::LayerKind;
    use crate::map::testing::{Call, RecordingSurface, ScriptedFetcher};

    const COLLECTION: &str = r#"{"type":"FeatureCollection","features":[]}"#;

    fn controller() -> (MapController<RecordingSurface>, ScriptedFetcher) {
        let fetcher = ScriptedFetcher::default();
        (MapController::new(FeatureLoader::new(fetcher.clone())), fetcher)
    }

    fn grid() -> FeatureCollection {
        FeatureCollection::new(vec![Feature::new(
            Some(FeatureId::from("0,0")),
            Geometry::Point {
                coordinates: vec![0.0, 0.0],
            },
        )])
    }

    fn register(map: &MapController<RecordingSurface>, id: &str) {
        futures::executor::block_on(map.register_source(id, grid())).expect("inline source");
    }

    #[test]
    fn commands_before_readiness_replay_in_dependency_order() {
        let (map, _) = controller();
        let surface = RecordingSurface::loading();
        map.attach(Some(surface.clone()));
        assert_eq!(map.phase(), Phase::Attaching);

        let handler = Listener::new(|_| {});
        map.on(EventKind::Click, "fill", &handler);
        register(&map, "grid");
        map.add_layer(LayerSpec::new("fill", LayerKind::Fill, "grid"))
            .expect("source is queued");
        map.add_layer(LayerSpec::new("fill", LayerKind::Fill, "grid"))
            .expect("source is queued");
        register(&map, "grid");

        assert!(surface.calls().is_empty());
        assert_eq!(
            map.pending(),
            PendingCounts {
                sources: 1,
                layers: 1,
                listeners: 1
            }
        );

        surface.fire_load();

        assert_eq!(map.phase(), Phase::Ready);
        assert_eq!(
            surface.calls(),
            vec![
                Call::AddSource("grid".into()),
                Call::AddLayer("fill".into()),
                Call::On(EventKind::Click, "fill".into()),
            ]
        );
        assert!(map.pending().is_empty());
        assert_eq!(surface.load_subscribers(), 0);
    }

    #[test]
    fn already_loaded_surface_is_ready_immediately() {
        let (map, _) = controller();
        let surface = RecordingSurface::loaded();
        register(&map, "grid");
        map.attach(Some(surface.clone()));

        assert!(map.is_ready());
        assert_eq!(surface.source_ids(), vec!["grid".to_owned()]);
        assert_eq!(surface.load_subscribers(), 0);
    }

    #[test]
    fn repeated_load_signal_does_not_replay_twice() {
        let (map, _) = controller();
        let surface = RecordingSurface::loading();
        map.attach(Some(surface.clone()));
        register(&map, "grid");

        surface.fire_load();
        surface.fire_load();

        assert_eq!(surface.calls(), vec![Call::AddSource("grid".into())]);
    }

    #[test]
    fn attaching_the_same_surface_is_a_no_op() {
        let (map, _) = controller();
        let surface = RecordingSurface::loaded();
        map.attach(Some(surface.clone()));
        register(&map, "grid");
        surface.clear_calls();

        map.attach(Some(surface.clone()));

        assert!(surface.calls().is_empty());
        assert_eq!(map.registered_sources(), vec!["grid".to_owned()]);
    }

    #[test]
    fn swapping_surfaces_tears_down_the_old_one_first() {
        let (map, _) = controller();
        let a = RecordingSurface::loaded();
        map.attach(Some(a.clone()));
        register(&map, "grid");
        map.add_layer(LayerSpec::new("fill", LayerKind::Fill, "grid"))
            .expect("known source");
        let handler = Listener::new(|_| {});
        map.on(EventKind::MouseMove, "fill", &handler);
        a.clear_calls();

        let b = RecordingSurface::loading();
        map.attach(Some(b.clone()));

        assert_eq!(
            a.calls(),
            vec![
                Call::Off(EventKind::MouseMove, "fill".into()),
                Call::RemoveLayer("fill".into()),
                Call::RemoveSource("grid".into()),
            ]
        );
        assert!(a.source_ids().is_empty() && a.layer_ids().is_empty());
        assert_eq!(a.handler_count(), 0);
        assert!(b.calls().is_empty());
        assert_eq!(map.tracked_listener_count(), 0);

        map.attach(None);
        assert_eq!(map.phase(), Phase::Detached);
        assert!(map.registered_sources().is_empty());
        assert!(map.registered_layers().is_empty());
        assert_eq!(map.tracked_listener_count(), 0);
        assert_eq!(b.load_subscribers(), 0);

        map.attach(None);
        assert_eq!(map.phase(), Phase::Detached);
    }

    #[test]
    fn stale_load_signal_from_a_swapped_surface_is_ignored() {
        let (map, _) = controller();
        let a = RecordingSurface::loading();
        map.attach(Some(a.clone()));
        assert_eq!(a.load_subscribers(), 1);

        let b = RecordingSurface::loading();
        map.attach(Some(b.clone()));
        assert_eq!(a.load_subscribers(), 0);

        register(&map, "grid");
        a.fire_load();
        assert_eq!(map.phase(), Phase::Attaching);
        assert!(a.calls().is_empty());

        b.fire_load();
        assert_eq!(b.source_ids(), vec!["grid".to_owned()]);
    }

    #[test]
    fn pending_commands_survive_a_swap_but_not_reset() {
        let (map, _) = controller();
        map.attach(Some(RecordingSurface::loading()));
        register(&map, "grid");

        let b = RecordingSurface::loading();
        map.attach(Some(b.clone()));
        assert_eq!(map.pending().sources, 1);

        map.reset();
        assert!(map.pending().is_empty());
        assert!(map.surface().is_none());
    }

    #[test]
    fn layer_with_unknown_source_is_rejected() {
        let (map, _) = controller();
        let err = map
            .add_layer(LayerSpec::new("fill", LayerKind::Fill, "nowhere"))
            .expect_err("unknown source");
        assert_eq!(
            err,
            UsageError::UnknownSource {
                layer: "fill".into(),
                source_id: "nowhere".into()
            }
        );
        assert!(map.pending().is_empty());
    }

    #[test]
    fn remove_layer_is_idempotent_for_queued_and_applied_ids() {
        let (map, _) = controller();
        register(&map, "grid");
        map.add_layer(LayerSpec::new("queued", LayerKind::Fill, "grid"))
            .expect("known source");
        map.remove_layer("queued");
        map.remove_layer("queued");
        assert_eq!(map.pending().layers, 0);

        let surface = RecordingSurface::loaded();
        map.attach(Some(surface.clone()));
        map.add_layer(LayerSpec::new("applied", LayerKind::Fill, "grid"))
            .expect("known source");
        map.remove_layer("applied");
        map.remove_layer("applied");
        map.remove_layer("never-added");

        assert!(surface.layer_ids().is_empty());
        assert!(map.registered_layers().is_empty());
        assert_eq!(
            surface
                .calls()
                .iter()
                .filter(|c| matches!(c, Call::RemoveLayer(_)))
                .count(),
            1
        );
    }

    #[test]
    fn remove_source_drops_queued_declaration() {
        let (map, _) = controller();
        register(&map, "grid");
        map.remove_source("grid");
        map.remove_source("grid");

        let surface = RecordingSurface::loaded();
        map.attach(Some(surface.clone()));
        assert!(surface.source_ids().is_empty());
    }

    #[test]
    fn off_removes_queued_and_attached_handlers() {
        let (map, _) = controller();
        let surface = RecordingSurface::loading();
        map.attach(Some(surface.clone()));
        let queued = Listener::new(|_| {});
        map.on(EventKind::Click, "fill", &queued);
        map.off(EventKind::Click, "fill", &queued);
        assert_eq!(map.pending().listeners, 0);

        register(&map, "grid");
        surface.fire_load();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let attached = Listener::new(move |_| counter.set(counter.get() + 1));
        map.on(EventKind::Click, "fill", &attached);
        map.on(EventKind::Click, "fill", &attached);
        assert_eq!(map.tracked_listener_count(), 1);

        surface.emit(EventKind::Click, "fill", Vec::new());
        assert_eq!(hits.get(), 1);

        map.off(EventKind::Click, "fill", &attached);
        map.off(EventKind::Click, "fill", &attached);
        surface.emit(EventKind::Click, "fill", Vec::new());
        assert_eq!(hits.get(), 1);
        assert_eq!(map.tracked_listener_count(), 0);
    }

    #[test]
    fn readiness_observer_sees_transitions() {
        let (map, _) = controller();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        map.set_readiness_observer(move |ready| log.borrow_mut().push(ready));

        let a = RecordingSurface::loading();
        map.attach(Some(a.clone()));
        a.fire_load();
        map.attach(Some(RecordingSurface::loaded()));
        map.attach(None);

        assert_eq!(*seen.borrow(), vec![true, false, true, false]);
    }

    #[test]
    fn remote_source_resolving_after_detach_is_cached_but_not_applied() {
        let (map, fetcher) = controller();
        let surface = RecordingSurface::loaded();
        map.attach(Some(surface.clone()));

        let mut pool = LocalPool::new();
        let outcome = Rc::new(RefCell::new(None));
        {
            let map = map.clone();
            let outcome = outcome.clone();
            pool.spawner()
                .spawn_local(async move {
                    let result = map.register_source("countries", "/api/geo/countries").await;
                    *outcome.borrow_mut() = Some(result);
                })
                .expect("spawn");
        }
        pool.run_until_stalled();

        map.attach(None);
        fetcher.respond("/api/geo/countries", 200, COLLECTION);
        pool.run_until_stalled();

        assert!(map.cached("/api/geo/countries").is_some());
        assert!(surface.source_ids().is_empty());
        assert!(map.registered_sources().is_empty());
        assert!(map.pending().is_empty());
        assert_eq!(
            outcome.borrow_mut().take(),
            Some(Err(MapError::Usage(UsageError::SurfaceDetached {
                id: "countries".into()
            })))
        );
    }

    #[test]
    fn failed_reload_keeps_the_previous_source() {
        let (map, fetcher) = controller();
        let surface = RecordingSurface::loaded();
        map.attach(Some(surface.clone()));
        register(&map, "countries");

        let mut pool = LocalPool::new();
        let outcome = Rc::new(RefCell::new(None));
        {
            let map = map.clone();
            let outcome = outcome.clone();
            pool.spawner()
                .spawn_local(async move {
                    let result = map.register_source("countries", "/api/geo/countries").await;
                    *outcome.borrow_mut() = Some(result);
                })
                .expect("spawn");
        }
        pool.run_until_stalled();
        fetcher.respond("/api/geo/countries", 500, "");
        pool.run_until_stalled();

        assert!(matches!(
            outcome.borrow_mut().take(),
            Some(Err(MapError::Load(LoadError::Status { status: 500, .. })))
        ));
        let kept = surface.source("countries").expect("old source kept");
        assert_eq!(kept.data.len(), 1);
    }

    #[test]
    fn promoted_sources_carry_the_property_name() {
        let (map, _) = controller();
        let surface = RecordingSurface::loaded();
        map.attach(Some(surface.clone()));
        futures::executor::block_on(map.register_source_with("squares", grid(), Some("square")))
            .expect("inline source");
        assert_eq!(
            surface.source("squares").and_then(|s| s.promote_id),
            Some("square".to_owned())
        );
    }

    #[test]
    fn presentation_sync_waits_for_surface_and_source() {
        let (map, _) = controller();
        let presentation =
            PresentationState::new([FeatureId::from("0,0")]).with_selected(Some("0,0".into()));
        assert!(!map.sync_presentation("grid", &presentation));

        let surface = RecordingSurface::loading();
        map.attach(Some(surface.clone()));
        register(&map, "grid");
        assert!(!map.sync_presentation("grid", &presentation));

        surface.fire_load();
        assert!(map.sync_presentation("grid", &presentation));
        assert!(
            surface
                .state_of("grid", &FeatureId::from("0,0"))
                .is_some_and(|s| s.is_selected())
        );
        assert!(!map.sync_presentation("other", &presentation));
    }

    #[test]
    fn proxies_fit_and_query_only_with_a_surface() {
        let (map, _) = controller();
        map.fit_to_bounds([0.0, 0.0, 1.0, 1.0]);
        assert!(map.query_rendered_features(ScreenPoint::default(), &[]).is_empty());

        let surface = RecordingSurface::loaded();
        surface.set_hits(vec![FeatureHit {
            id: Some(FeatureId::from("3,4")),
            layer: Some("squares-fill".into()),
            ..FeatureHit::default()
        }]);
        map.attach(Some(surface.clone()));
        map.fit_to_bounds([-20.0, 5.0, 20.0, 35.0]);

        assert_eq!(
            surface.fits(),
            vec![(
                [-20.0, 5.0, 20.0, 35.0],
                FitOptions {
                    padding: FIT_PADDING_PX,
                    duration_ms: FIT_DURATION_MS
                }
            )]
        );
        assert_eq!(
            map.query_rendered_features(ScreenPoint::default(), &["squares-fill"])
                .len(),
            1
        );
        assert!(
            map.query_rendered_features(ScreenPoint::default(), &["roads"])
                .is_empty()
        );
    }

    #[test]
    fn feature_state_is_forwarded_only_to_an_attached_surface() {
        let (map, _) = controller();
        let square = FeatureId::from("0,0");
        let selected = FeatureState {
            selected: Some(true),
            ..FeatureState::default()
        };
        map.set_feature_state("grid", &square, &selected);

        let surface = RecordingSurface::loading();
        map.attach(Some(surface.clone()));
        map.set_feature_state("grid", &square, &selected);
        assert_eq!(surface.state_writes(), 1);
        assert!(
            surface
                .state_of("grid", &square)
                .is_some_and(|s| s.is_selected())
        );

        map.attach(None);
        map.set_feature_state("grid", &FeatureId::from("1,1"), &selected);
        assert_eq!(surface.state_writes(), 1);
    }

    #[test]
    fn load_and_cached_share_the_controller_loader() {
        let (map, fetcher) = controller();
        assert!(map.cached("/api/geo/roads").is_none());

        let mut pool = LocalPool::new();
        let outcome = Rc::new(RefCell::new(None));
        for _ in 0..2 {
            let map = map.clone();
            let outcome = outcome.clone();
            pool.spawner()
                .spawn_local(async move {
                    let result = map.load("/api/geo/roads").await;
                    *outcome.borrow_mut() = Some(result);
                })
                .expect("spawn");
        }
        pool.run_until_stalled();
        assert_eq!(fetcher.request_count("/api/geo/roads"), 1);

        fetcher.respond("/api/geo/roads", 200, COLLECTION);
        pool.run_until_stalled();

        let loaded = outcome
            .borrow_mut()
            .take()
            .expect("load finished")
            .expect("valid collection");
        let cached = map.cached("/api/geo/roads").expect("cached after load");
        assert!(Rc::ptr_eq(&loaded, &cached));

        // A remote registration reuses the cached collection.
        let surface = RecordingSurface::loaded();
        map.attach(Some(surface.clone()));
        futures::executor::block_on(map.register_source("roads", "/api/geo/roads"))
            .expect("cached source");
        assert_eq!(fetcher.request_count("/api/geo/roads"), 1);
        assert_eq!(surface.source_ids(), vec!["roads".to_owned()]);
    }
}
