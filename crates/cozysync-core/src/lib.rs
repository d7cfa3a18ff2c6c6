//! CozySync Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - Domain entities (the metadata record, revisions, sides)
//! - Platform rules (id derivation, path incompatibilities)
//! - Port definitions (traits for the store, the sides, the watchers)
//! - Typed configuration

pub mod config;
pub mod domain;
pub mod ports;
