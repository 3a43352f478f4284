pub mod classify;
pub mod plan;
