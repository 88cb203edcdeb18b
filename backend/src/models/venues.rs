use serde::{Deserialize, Serialize};

use super::Coordinates;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub name: String,
    pub category: String,
    pub coords: Coordinates,
    pub address: Option<String>,
}

impl Venue {
    /// Same place when name and coordinates agree; addresses are often missing.
    pub fn same_place(&self, other: &Venue) -> bool {
        self.name == other.name
            && (self.coords.latitude - other.coords.latitude).abs() < 1e-6
            && (self.coords.longitude - other.coords.longitude).abs() < 1e-6
    }
}
