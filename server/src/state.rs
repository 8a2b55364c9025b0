use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderValue;
use bytes::Bytes;
use tradhelm_shared::{FeatureCollection, fixtures};

use crate::config::{fixture_max_age_secs, static_dir};

/// The fixture datasets the server publishes under `/api/geo/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoCollection {
    Countries,
    Cities,
    Roads,
}

impl GeoCollection {
    pub const ALL: [GeoCollection; 3] = [
        GeoCollection::Countries,
        GeoCollection::Cities,
        GeoCollection::Roads,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GeoCollection::Countries => "countries",
            GeoCollection::Cities => "cities",
            GeoCollection::Roads => "roads",
        }
    }

    fn build(self) -> FeatureCollection {
        match self {
            GeoCollection::Countries => fixtures::countries(),
            GeoCollection::Cities => fixtures::cities(),
            GeoCollection::Roads => fixtures::roads(),
        }
    }
}

/// A collection serialized once at startup and shared by every response.
#[derive(Debug, Clone)]
pub struct GeoPayload {
    pub features: usize,
    pub etag: String,
    pub json: Arc<Bytes>,
}

impl GeoPayload {
    fn serialize(collection: GeoCollection) -> Result<Self, serde_json::Error> {
        let data = collection.build();
        let json = Bytes::from(serde_json::to_vec(&data)?);
        let mut hasher = DefaultHasher::new();
        json.hash(&mut hasher);
        Ok(Self {
            features: data.len(),
            etag: format!("\"geo-{}-{:016x}\"", collection.name(), hasher.finish()),
            json: Arc::new(json),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub countries: GeoPayload,
    pub cities: GeoPayload,
    pub roads: GeoPayload,
    /// `Cache-Control` value for every `/api/geo/*` response.
    pub fixture_cache_control: HeaderValue,
    pub static_dir: PathBuf,
}

impl AppState {
    /// State from the environment (see [`crate::config`]).
    pub fn from_env() -> Result<Self, serde_json::Error> {
        Self::new(fixture_max_age_secs(), static_dir())
    }

    pub fn new(fixture_max_age_secs: u64, static_dir: PathBuf) -> Result<Self, serde_json::Error> {
        Ok(Self {
            countries: GeoPayload::serialize(GeoCollection::Countries)?,
            cities: GeoPayload::serialize(GeoCollection::Cities)?,
            roads: GeoPayload::serialize(GeoCollection::Roads)?,
            fixture_cache_control: HeaderValue::try_from(format!(
                "public, max-age={fixture_max_age_secs}"
            ))
            .unwrap_or_else(|_| HeaderValue::from_static("no-cache")),
            static_dir,
        })
    }

    pub fn payload(&self, collection: GeoCollection) -> &GeoPayload {
        match collection {
            GeoCollection::Countries => &self.countries,
            GeoCollection::Cities => &self.cities,
            GeoCollection::Roads => &self.roads,
        }
    }
}
