//! Layer styling for the board and the geographic fixtures.
//!
//! Square colour precedence is selected > hovered > loaded > idle. [`Highlight::resolve`]
//! and [`square_fill_color`] encode the same order; the tests pin them together.

use serde_json::{Value, json};
use tradhelm_shared::Building;

use crate::map::surface::{FeatureState, LayerKind, LayerSpec};

pub const SELECTED_COLOR: &str = "#3b82f6";
pub const HOVERED_COLOR: &str = "#60a5fa";
pub const LOADED_COLOR: &str = "#00ff0d";
pub const IDLE_COLOR: &str = "rgba(0,0,0,0)";
pub const OUTLINE_COLOR: &str = "#374151";

const COUNTRY_COLOR: &str = "#d6c9a1";
const ROAD_COLOR: &str = "#8b5a2b";
const CITY_COLOR: &str = "#b91c1c";
const BUILDING_TEXT_COLOR: &str = "#f8fafc";
const BUILDING_HALO_COLOR: &str = "#111827";
/// Served by the default map style's glyph endpoint.
const BUILDING_FONT: &str = "Open Sans Semibold";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Highlight {
    Selected,
    Hovered,
    Loaded,
    Idle,
}

impl Highlight {
    /// Evaluation order of the fill expression.
    pub const PRECEDENCE: [Highlight; 4] = [
        Highlight::Selected,
        Highlight::Hovered,
        Highlight::Loaded,
        Highlight::Idle,
    ];

    pub fn resolve(state: &FeatureState) -> Self {
        if state.is_selected() {
            Highlight::Selected
        } else if state.is_hovered() {
            Highlight::Hovered
        } else if state.is_loaded() {
            Highlight::Loaded
        } else {
            Highlight::Idle
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Highlight::Selected => SELECTED_COLOR,
            Highlight::Hovered => HOVERED_COLOR,
            Highlight::Loaded => LOADED_COLOR,
            Highlight::Idle => IDLE_COLOR,
        }
    }

    fn state_key(self) -> Option<&'static str> {
        match self {
            Highlight::Selected => Some("selected"),
            Highlight::Hovered => Some("hovered"),
            Highlight::Loaded => Some("loaded"),
            Highlight::Idle => None,
        }
    }
}

/// `["case", <selected?>, c1, <hovered?>, c2, <loaded?>, c3, idle]` over feature-state.
pub fn square_fill_color() -> Value {
    let mut expr = vec![json!("case")];
    for highlight in Highlight::PRECEDENCE {
        match highlight.state_key() {
            Some(key) => {
                expr.push(json!(["boolean", ["feature-state", key], false]));
                expr.push(json!(highlight.color()));
            }
            None => expr.push(json!(highlight.color())),
        }
    }
    Value::Array(expr)
}

pub fn square_fill_layer(id: &str, source: &str) -> LayerSpec {
    LayerSpec::new(id, LayerKind::Fill, source)
        .paint("fill-color", square_fill_color())
        .paint("fill-opacity", json!(0.55))
}

pub fn square_outline_layer(id: &str, source: &str) -> LayerSpec {
    LayerSpec::new(id, LayerKind::Line, source)
        .paint("line-color", json!(OUTLINE_COLOR))
        .paint("line-width", json!(1))
}

pub fn country_fill_layer(id: &str, source: &str) -> LayerSpec {
    LayerSpec::new(id, LayerKind::Fill, source)
        .paint("fill-color", json!(COUNTRY_COLOR))
        .paint("fill-opacity", json!(0.35))
}

pub fn road_line_layer(id: &str, source: &str) -> LayerSpec {
    LayerSpec::new(id, LayerKind::Line, source)
        .paint("line-color", json!(ROAD_COLOR))
        .paint("line-width", json!(2.5))
        .layout("line-cap", json!("round"))
}

pub fn city_circle_layer(id: &str, source: &str) -> LayerSpec {
    LayerSpec::new(id, LayerKind::Circle, source)
        .paint("circle-color", json!(CITY_COLOR))
        .paint("circle-radius", json!(5))
        .paint("circle-stroke-color", json!("#ffffff"))
        .paint("circle-stroke-width", json!(1))
}

/// Id of the marker layer for `building` on top of `source`.
pub fn building_layer_id(source: &str, building: Building) -> String {
    format!("{source}-{}", building.key())
}

/// One symbol layer per building kind over the square source. Every square carries the
/// label, and only the square whose `building` feature-state names the kind shows it,
/// so moving or clearing a building needs no source update.
pub fn building_marker_layers(source: &str) -> Vec<LayerSpec> {
    Building::ALL
        .into_iter()
        .map(|building| {
            LayerSpec::new(building_layer_id(source, building), LayerKind::Symbol, source)
                .layout("text-field", json!(building.label()))
                .layout("text-font", json!([BUILDING_FONT]))
                .layout("text-size", json!(11))
                .layout("text-allow-overlap", json!(true))
                .layout("text-ignore-placement", json!(true))
                .paint("text-color", json!(BUILDING_TEXT_COLOR))
                .paint("text-halo-color", json!(BUILDING_HALO_COLOR))
                .paint("text-halo-width", json!(1))
                .paint(
                    "text-opacity",
                    json!(["case", ["==", ["feature-state", "building"], building.key()], 1, 0]),
                )
        })
        .collect()
}
