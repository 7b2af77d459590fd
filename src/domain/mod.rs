//! Domain layer: provider-agnostic subscription billing model.

pub mod foundation;
pub mod gateway;
pub mod plan;
pub mod subscription;

pub use gateway::Gateway;
