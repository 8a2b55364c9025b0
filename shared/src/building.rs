use std::fmt;

use serde::{Deserialize, Serialize};

/// A structure the player can put on the selected square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Building {
    Mine,
    Farm,
    Sawmill,
}

impl Building {
    pub const ALL: [Building; 3] = [Building::Mine, Building::Farm, Building::Sawmill];

    /// Wire name, also the value stored in the engine's feature state.
    pub fn key(self) -> &'static str {
        match self {
            Building::Mine => "mine",
            Building::Farm => "farm",
            Building::Sawmill => "sawmill",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Building::Mine => "Mine",
            Building::Farm => "Farm",
            Building::Sawmill => "Sawmill",
        }
    }
}

impl fmt::Display for Building {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
