//! Storage plane
//!
//! Master/replica pool routing lives in [`replicas`]. All connection
//! handling goes through [`ConnectionManager`]; there is no separate
//! single-pool wrapper.

pub mod replicas;

pub use replicas::ConnectionManager;
