//! Map lifecycle: one rendering surface at a time, with sources, layers and listeners
//! that may be registered before the surface exists and survive its replacement.

pub mod controller;
pub mod error;
pub mod feature_state;
pub mod listeners;
pub mod loader;
pub mod maplibre;
pub mod paint;
pub mod queue;
pub mod surface;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::MapController;
pub use feature_state::PresentationState;
pub use loader::{FeatureLoader, HttpFetcher};
pub use surface::{EventKind, Listener, RenderingSurface};
