//! Infrastructure layer: event store, settlement index, policy store,
//! collaborator lookups, the settlement engine, and reporting projections.

pub mod collaborators;
pub mod event_store;
pub mod index;
pub mod policy_store;
pub mod projections;
pub mod read_model;
pub mod settlement;
