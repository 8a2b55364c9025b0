pub mod building;
pub mod fixtures;
pub mod geo;
pub mod grid;

pub use building::Building;
pub use geo::*;
pub use grid::*;
