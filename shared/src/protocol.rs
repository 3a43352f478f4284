/// Catalog endpoint for querying service instances by name
pub const CATALOG_SERVICE_PATH: &str = "/v1/catalog/service";

/// Node-metadata tag keys used in catalog filter expressions
pub const META_ENV: &str = "env";
pub const META_STAGE: &str = "stage";
