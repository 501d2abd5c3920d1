pub mod config;
pub mod yaml_include;

/// Common utilities shared across the Cellar storefront workspace
///
/// - Configuration structs and YAML loading
/// - Shared test fixtures and assertion helpers

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

#[cfg(any(test, feature = "test-helpers"))]
pub use test_helpers::{generate_unique_id, get_test_database_url, sample_config};
