//! Canonical data model and registry wire constants shared across the
//! allow-list synchronizer.

pub mod protocol;
pub mod types;
