//! Domain core for the candlewire decision pipeline: value objects,
//! strategy/rule entities, pipeline events, pure services, and the ports
//! implemented by the infrastructure layer.

pub mod entities;
pub mod events;
pub mod repositories;
pub mod services;
pub mod value_objects;
