//! Static geographic datasets served by the fixture endpoints.

use crate::geo::{Feature, FeatureCollection, Geometry};

pub fn countries() -> FeatureCollection {
    FeatureCollection::new(vec![
        country("Northland", [-20.0, 5.0, 20.0, 35.0]),
        country("Southreach", [25.0, -25.0, 55.0, 5.0]),
    ])
}

pub fn cities() -> FeatureCollection {
    FeatureCollection::new(vec![
        city("Paris", [2.3522, 48.8566], [2.2522, 48.7566, 2.4522, 48.9566]),
        city("Nairobi", [36.8219, -1.2921], [36.7219, -1.45, 36.9419, -1.15]),
        city("Tokyo", [139.6917, 35.6895], [139.5919, 35.5299, 139.9319, 35.8099]),
    ])
}

pub fn roads() -> FeatureCollection {
    FeatureCollection::new(vec![
        road(
            "Equatorial Trail",
            vec![[-15.0, 10.0], [0.0, 12.0], [15.0, 8.0], [30.0, 6.0]],
        ),
        road(
            "Meridian Highway",
            vec![[40.0, -20.0], [38.0, -5.0], [37.0, 8.0], [36.0, 18.0]],
        ),
    ])
}

fn country(name: &str, bbox: [f64; 4]) -> Feature {
    let [west, south, east, north] = bbox;
    let ring = vec![
        vec![west, south],
        vec![east, south],
        vec![east, north],
        vec![west, north],
        vec![west, south],
    ];
    Feature::new(
        None,
        Geometry::Polygon {
            coordinates: vec![ring],
        },
    )
        .with_property("name", name)
        .with_bbox(bbox)
}

fn city(name: &str, at: [f64; 2], bbox: [f64; 4]) -> Feature {
    Feature::new(
        None,
        Geometry::Point {
            coordinates: at.to_vec(),
        },
    )
        .with_property("name", name)
        .with_bbox(bbox)
}

fn road(name: &str, line: Vec<[f64; 2]>) -> Feature {
    let coordinates = line.iter().map(|p| p.to_vec()).collect();
    Feature::new(None, Geometry::LineString { coordinates }).with_property("name", name)
}
