//! Static transformer registry.
//!
//! Dataset keys map to transformer constructors at compile time; an
//! unknown key is a configuration error surfaced before any fetch.

use crate::config::dataset::DatasetDescriptor;
use crate::datasets::{
    CensusAcsTransformer, CensusZctasTransformer, FoodSupplyGapTransformer, ZillowZoriTransformer,
};
use crate::domain::ports::DatasetTransformer;
use crate::utils::error::{IngestError, Result};

pub fn transformer_for(
    key: &str,
    descriptor: &DatasetDescriptor,
) -> Result<Box<dyn DatasetTransformer>> {
    match key {
        "census_acs" => Ok(Box::new(CensusAcsTransformer::new(descriptor)?)),
        "census_zctas_2020" => Ok(Box::new(CensusZctasTransformer::new(descriptor)?)),
        "food_supply_gap" => Ok(Box::new(FoodSupplyGapTransformer::new(descriptor)?)),
        "zillow_zori" => Ok(Box::new(ZillowZoriTransformer::new(descriptor)?)),
        _ => Err(IngestError::UnknownDataset {
            key: key.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dataset::DatasetDescriptor;

    const MINIMAL: &str = r#"
source = "paginated_api"

[dataset]
id = "39ihbhg"
name = "Emergency Food Supply Gap"

[api]
endpoint = "https://data.cityofnewyork.us/api/v3/views/39ihbhg/query.json"

[schema]
table_name = "food_supply_gaps"

[[schema.columns]]
name = "year"
type = "INTEGER"
"#;

    #[test]
    fn test_known_key_resolves() {
        let descriptor = DatasetDescriptor::from_toml_str(MINIMAL).unwrap();
        assert!(transformer_for("food_supply_gap", &descriptor).is_ok());
    }

    #[test]
    fn test_unknown_key_is_config_error() {
        let descriptor = DatasetDescriptor::from_toml_str(MINIMAL).unwrap();
        match transformer_for("no_such_dataset", &descriptor) {
            Err(IngestError::UnknownDataset { key }) => assert_eq!(key, "no_such_dataset"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("unknown key must not resolve"),
        }
    }
}
