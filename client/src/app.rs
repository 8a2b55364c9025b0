use leptos::prelude::*;
use leptos::task::spawn_local;

use std::cell::RefCell;

use tracing::{debug, info, warn};
use tradhelm_shared::{BBox, Building, Feature, FeatureCollection, GridSpec, SquareId};

use crate::map::maplibre::MapLibreSurface;
use crate::map::paint::{self, Highlight};
use crate::map::surface::{FeatureState, LayerSpec, MapEvent};
use crate::map::{
    EventKind, FeatureLoader, HttpFetcher, Listener, MapController, PresentationState,
    RenderingSurface,
};

pub(crate) const SQUARES_SOURCE: &str = "squares";
pub(crate) const SQUARES_FILL: &str = "squares-fill";
pub(crate) const SQUARES_OUTLINE: &str = "squares-outline";
pub(crate) const COUNTRIES_SOURCE: &str = "countries";
pub(crate) const COUNTRIES_FILL: &str = "countries-fill";
pub(crate) const ROADS_SOURCE: &str = "roads";
pub(crate) const ROADS_LINE: &str = "roads-line";
pub(crate) const CITIES_SOURCE: &str = "cities";
pub(crate) const CITIES_CIRCLE: &str = "cities-circle";

pub(crate) const COUNTRIES_URL: &str = "/api/geo/countries";
pub(crate) const ROADS_URL: &str = "/api/geo/roads";
pub(crate) const CITIES_URL: &str = "/api/geo/cities";

/// Feature property MapLibre promotes to the feature id of a square.
const SQUARE_ID_PROPERTY: &str = "square";

struct KeydownBinding {
    window: web_sys::Window,
    _handler: wasm_bindgen::closure::Closure<dyn Fn(web_sys::KeyboardEvent)>,
}

thread_local! {
    static MAP_CONTROLLER: MapController<MapLibreSurface> =
        MapController::new(FeatureLoader::new(HttpFetcher));
    static KEYDOWN_BINDING: RefCell<Option<KeydownBinding>> = const { RefCell::new(None) };
}

/// The session's single map controller.
pub(crate) fn controller() -> MapController<MapLibreSurface> {
    MAP_CONTROLLER.with(MapController::clone)
}

/// The selected square and the building placed on it. A building only exists on the
/// current selection, so selecting another square drops it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BoardSelection {
    pub square: Option<SquareId>,
    pub building: Option<Building>,
}

impl BoardSelection {
    pub(crate) fn select(&mut self, square: SquareId) {
        self.square = Some(square);
        self.building = None;
    }

    /// Ignored while no square is selected.
    pub(crate) fn place(&mut self, building: Building) {
        if self.square.is_some() {
            self.building = Some(building);
        }
    }

    fn placement(&self) -> Option<(SquareId, Building)> {
        self.square.zip(self.building)
    }
}

/// Newtype wrappers so the board signals don't overwrite each other in context.
#[derive(Clone, Copy)]
pub(crate) struct Hovered(pub RwSignal<Option<SquareId>>);
#[derive(Clone, Copy)]
pub(crate) struct Selected(pub RwSignal<BoardSelection>);
#[derive(Clone, Copy)]
pub(crate) struct MapReady(pub RwSignal<bool>);
#[derive(Clone, Copy)]
pub(crate) struct GameStarted(pub RwSignal<bool>);

/// Highlight inputs for the square source. Every square on the board counts as loaded.
pub(crate) fn square_presentation(
    selection: BoardSelection,
    hovered: Option<SquareId>,
) -> PresentationState {
    PresentationState::new(SquareId::all().map(|sq| sq.feature_id()))
        .with_selected(selection.square.map(|sq| sq.feature_id()))
        .with_hovered(hovered.map(|sq| sq.feature_id()))
        .with_building(
            selection
                .placement()
                .map(|(sq, building)| (sq.feature_id(), building)),
        )
}

fn square_under(event: &MapEvent) -> Option<SquareId> {
    event.first_feature_id().and_then(SquareId::from_feature_id)
}

/// Extent of the clicked feature, looked up by name in its cached collection.
fn clicked_extent(collection: &FeatureCollection, event: &MapEvent) -> Option<BBox> {
    let name = event
        .features
        .iter()
        .find_map(|hit| hit.properties.get("name").and_then(|v| v.as_str()))?;
    collection
        .features
        .iter()
        .find(|f| f.name() == Some(name))
        .and_then(Feature::extent)
}

fn add_layers<S: RenderingSurface + 'static>(
    map: &MapController<S>,
    layers: impl IntoIterator<Item = LayerSpec>,
) {
    for layer in layers {
        if let Err(e) = map.add_layer(layer) {
            warn!(error = %e, "layer not added");
        }
    }
}

/// Registers a fixture source by URL and adds its layer. `click` is attached to that
/// layer only afterwards, so it never targets a layer the surface does not have.
async fn register_fixture<S: RenderingSurface + 'static>(
    map: &MapController<S>,
    source: &str,
    url: &str,
    layer: LayerSpec,
    click: Option<Listener>,
) {
    if let Err(e) = map.register_source(source, url).await {
        warn!(source, url, error = %e, "fixture source not registered");
        return;
    }
    let layer_id = layer.id.clone();
    add_layers(map, [layer]);
    if let Some(listener) = click {
        map.on(EventKind::Click, &layer_id, &listener);
    }
}

/// Zooms to the clicked country's extent.
fn fit_country_listener() -> Listener {
    Listener::new(|event: &MapEvent| {
        let map = controller();
        if let Some(bbox) = map
            .cached(COUNTRIES_URL)
            .and_then(|countries| clicked_extent(&countries, event))
        {
            map.fit_to_bounds(bbox);
        }
    })
}

/// Declares every source, layer and square listener. Safe before any surface exists;
/// the controller queues until one is ready.
fn register_map_content(selected: RwSignal<BoardSelection>, hovered: RwSignal<Option<SquareId>>) {
    let map = controller();

    let on_move = Listener::new(move |event: &MapEvent| {
        let square = square_under(event);
        if hovered.get_untracked() != square {
            hovered.set(square);
        }
    });
    let on_leave = Listener::new(move |_: &MapEvent| hovered.set(None));
    let on_click = Listener::new(move |event: &MapEvent| {
        if let Some(square) = square_under(event) {
            debug!(%square, "square selected");
            selected.update(|selection| selection.select(square));
        }
    });
    map.on(EventKind::MouseMove, SQUARES_FILL, &on_move);
    map.on(EventKind::MouseLeave, SQUARES_FILL, &on_leave);
    map.on(EventKind::Click, SQUARES_FILL, &on_click);

    let grid = GridSpec::default().feature_collection();
    {
        let map = map.clone();
        spawn_local(async move {
            match map
                .register_source_with(SQUARES_SOURCE, grid, Some(SQUARE_ID_PROPERTY))
                .await
            {
                Ok(()) => {
                    add_layers(
                        &map,
                        [
                            paint::square_fill_layer(SQUARES_FILL, SQUARES_SOURCE),
                            paint::square_outline_layer(SQUARES_OUTLINE, SQUARES_SOURCE),
                        ],
                    );
                    add_layers(&map, paint::building_marker_layers(SQUARES_SOURCE));
                }
                Err(e) => warn!(error = %e, "square grid not registered"),
            }
        });
    }

    let fixtures = [
        (
            COUNTRIES_SOURCE,
            COUNTRIES_URL,
            paint::country_fill_layer(COUNTRIES_FILL, COUNTRIES_SOURCE),
            Some(fit_country_listener()),
        ),
        (
            ROADS_SOURCE,
            ROADS_URL,
            paint::road_line_layer(ROADS_LINE, ROADS_SOURCE),
            None,
        ),
        (
            CITIES_SOURCE,
            CITIES_URL,
            paint::city_circle_layer(CITIES_CIRCLE, CITIES_SOURCE),
            None,
        ),
    ];
    for (source, url, layer, click) in fixtures {
        let map = map.clone();
        spawn_local(async move {
            register_fixture(&map, source, url, layer, click).await;
        });
    }
}

/// Root application component. Provides the board signals via context and owns the map.
#[component]
pub fn App() -> impl IntoView {
    let selected: RwSignal<BoardSelection> = RwSignal::new(BoardSelection::default());
    let hovered: RwSignal<Option<SquareId>> = RwSignal::new(None);
    let map_ready: RwSignal<bool> = RwSignal::new(false);
    let game_started: RwSignal<bool> = RwSignal::new(false);

    provide_context(Selected(selected));
    provide_context(Hovered(hovered));
    provide_context(MapReady(map_ready));
    provide_context(GameStarted(game_started));

    let map = controller();
    map.set_readiness_observer(move |ready| map_ready.set(ready));
    register_map_content(selected, hovered);

    let container = NodeRef::<leptos::html::Div>::new();

    // Mount the engine once the container is in the DOM.
    Effect::new(move || {
        let Some(el) = container.get() else {
            return;
        };
        let map = controller();
        if map.surface().is_some() {
            return;
        }
        match MapLibreSurface::mount(&el) {
            Ok(surface) => map.attach(Some(surface)),
            Err(e) => warn!(error = ?e, "map engine failed to start"),
        }
    });

    // Push highlight flags whenever selection, building, hover or readiness changes.
    Effect::new(move || {
        let (ready, selected, hovered) = (map_ready.get(), selected.get(), hovered.get());
        if ready {
            controller().sync_presentation(SQUARES_SOURCE, &square_presentation(selected, hovered));
        }
    });

    on_cleanup(|| {
        let map = controller();
        let surface = map.surface();
        map.reset();
        if let Some(surface) = surface {
            surface.remove();
        }
        info!("map released");
    });

    // Escape clears the board selection.
    Effect::new(move || {
        use wasm_bindgen::prelude::*;

        let Some(window) = web_sys::window() else {
            return;
        };

        KEYDOWN_BINDING.with(|slot| {
            if let Some(old) = slot.borrow_mut().take() {
                let _ = old.window.remove_event_listener_with_callback(
                    "keydown",
                    old._handler.as_ref().unchecked_ref(),
                );
            }
        });

        let handler =
            Closure::<dyn Fn(web_sys::KeyboardEvent)>::new(move |e: web_sys::KeyboardEvent| {
                if e.key() == "Escape" {
                    selected.set(BoardSelection::default());
                    hovered.set(None);
                }
            });

        if window
            .add_event_listener_with_callback("keydown", handler.as_ref().unchecked_ref())
            .is_ok()
        {
            KEYDOWN_BINDING.with(|slot| {
                *slot.borrow_mut() = Some(KeydownBinding {
                    window: window.clone(),
                    _handler: handler,
                });
            });
        }
    });

    view! {
        <div style="width: 100%; height: 100%; position: relative; overflow: hidden; background: #0c0e17;">
            {move || {
                if game_started.get() {
                    view! { <Hud /> }.into_any()
                } else {
                    view! { <StartPanel /> }.into_any()
                }
            }}
            <div node_ref=container style="position: absolute; inset: 0;" />
        </div>
    }
}

/// Game HUD: a status strip and a bottom panel that opens when a square is selected.
#[component]
fn Hud() -> impl IntoView {
    let Selected(selected) = expect_context();
    let Hovered(hovered) = expect_context();
    let MapReady(map_ready) = expect_context();
    let panel_open: RwSignal<bool> = RwSignal::new(false);

    // Same colour the fill layer gives the square under the cursor.
    let hover_swatch = move || {
        let hovered = hovered.get();
        let state = FeatureState {
            selected: Some(hovered.is_some() && hovered == selected.get().square),
            hovered: Some(hovered.is_some()),
            loaded: Some(true),
            building: None,
        };
        Highlight::resolve(&state).color()
    };

    Effect::new(move || {
        if selected.get().square.is_some() {
            panel_open.set(true);
        }
    });

    view! {
        <aside style="position: absolute; inset: 0; pointer-events: none; z-index: 10; font-family: 'JetBrains Mono', monospace;">
            <div style="pointer-events: auto; margin: 12px auto 0; width: fit-content; display: flex; gap: 16px; padding: 6px 14px; background: #13161f; border: 1px solid #282c3e; border-radius: 6px; color: #e2e0d8; font-size: 0.75rem;">
                <span style="color: #9a9590;">
                    {move || if map_ready.get() { "map ready" } else { "loading map" }}
                </span>
                <span>
                    <span
                        style="display: inline-block; width: 8px; height: 8px; margin-right: 6px; border-radius: 2px;"
                        style:background=hover_swatch
                    ></span>
                    "hover "
                    {move || hovered.get().map(|sq| sq.to_string()).unwrap_or_else(|| "-".into())}
                </span>
            </div>
            <div
                style="pointer-events: auto; position: absolute; left: 0; right: 0; height: 50dvh; background: #13161f; border-top: 1px solid #282c3e; transition: bottom 0.25s;"
                style:bottom=move || if panel_open.get() { "0px" } else { "-50dvh" }
            >
                <button
                    style="position: absolute; top: -36px; left: 50%; transform: translateX(-50%); width: 48px; height: 32px; background: #13161f; border: 1px solid #282c3e; border-radius: 6px 6px 0 0; color: #e2e0d8; cursor: pointer;"
                    on:click=move |_| panel_open.update(|v| *v = !*v)
                >
                    {move || if panel_open.get() { "\u{25BC}" } else { "\u{25B2}" }}
                </button>
                <div style="padding: 16px 20px; color: #e2e0d8; font-size: 0.85rem;">
                    {move || {
                        let selection = selected.get();
                        match (selection.square, selection.building) {
                            (Some(sq), Some(building)) => {
                                format!("Square {} (column {}, row {}): {}", sq, sq.q, sq.r, building)
                            }
                            (Some(sq), None) => {
                                format!("Square {} (column {}, row {})", sq, sq.q, sq.r)
                            }
                            (None, _) => "No square selected".to_owned(),
                        }
                    }}
                    <div style="display: flex; gap: 8px; margin-top: 12px;">
                        {Building::ALL
                            .into_iter()
                            .map(|building| {
                                view! {
                                    <button
                                        style="padding: 6px 12px; background: #1d2130; border: 1px solid #282c3e; border-radius: 4px; color: #e2e0d8; cursor: pointer;"
                                        style:border-color=move || {
                                            if selected.get().building == Some(building) {
                                                paint::SELECTED_COLOR
                                            } else {
                                                "#282c3e"
                                            }
                                        }
                                        disabled=move || selected.get().square.is_none()
                                        on:click=move |_| selected.update(|s| s.place(building))
                                    >
                                        {building.label()}
                                    </button>
                                }
                            })
                            .collect_view()}
                    </div>
                </div>
            </div>
        </aside>
    }
}

/// Entry panel shown until the player starts a game.
#[component]
fn StartPanel() -> impl IntoView {
    let GameStarted(game_started) = expect_context();

    view! {
        <div style="position: absolute; top: 50%; left: 50%; transform: translate(-50%, -50%); z-index: 10; padding: 24px 28px; background: #13161f; border: 1px solid #282c3e; border-radius: 8px; color: #e2e0d8; font-family: 'Inter', system-ui, sans-serif; text-align: center;">
            <h2 style="margin: 0 0 12px; font-family: 'Silkscreen', monospace;">"Tradhelm"</h2>
            <button
                style="padding: 8px 18px; background: #3b82f6; border: none; border-radius: 6px; color: #fff; cursor: pointer;"
                on:click=move |_| game_started.set(true)
            >
                "Start game"
            </button>
        </div>
    }
}
