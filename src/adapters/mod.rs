//! Adapters: concrete implementations of the ports.

pub mod gateways;
pub mod memory;
pub mod postgres;
