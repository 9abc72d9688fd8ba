//! Concrete per-dataset transform bodies.
//!
//! Each transformer owns its parsed storage schema and turns the raw
//! batch from its source into canonical rows. Construction happens
//! through `crate::transform::registry::transformer_for`.

pub mod census_acs;
pub mod census_zctas;
pub mod food_supply_gap;
pub mod zillow_zori;

pub use census_acs::CensusAcsTransformer;
pub use census_zctas::CensusZctasTransformer;
pub use food_supply_gap::FoodSupplyGapTransformer;
pub use zillow_zori::ZillowZoriTransformer;
