//! Unisub - Unified Subscription Billing Core
//!
//! This crate reconciles subscription state across four behaviorally
//! incompatible billing gateways (Apple, Google Play, PayPal, Xendit) into
//! one canonical subscription record per subscriber.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
