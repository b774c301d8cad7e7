//! Indexer query pipeline
//!
//! Queries heterogeneous torrent and usenet indexers through one normalized
//! search interface and re-exposes each of them as a Newznab/Torznab
//! endpoint.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod indexer;
pub mod logging;

pub use error::{IndexerError, Result};
