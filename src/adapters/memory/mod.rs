//! In-process adapters.
//!
//! Backing stores for tests, replays and single-process deployments where
//! no cross-process sharing is needed.

pub mod lease_store;

pub use lease_store::InMemoryLeaseStore;
