//! Adapters behind the domain ports: paper broker, CSV replay feed,
//! in-memory and optional Postgres persistence, the HTTP oracle client, and
//! run artifact writers.

pub mod artifacts;
pub mod broker;
pub mod market_data;
pub mod oracle;
pub mod persistence;
