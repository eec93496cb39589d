//! DevSketch engine: turns a design document into a scaffolded, published
//! and optionally sandboxed project.
//!
//! The pipeline is: generate design artifacts (diagram, ERD, API spec)
//! through a completion service, compile the ERD, merge starter templates
//! into a workspace, publish it to a VCS host, and provision a routed
//! docker-in-docker sandbox that runs the result.

pub mod catalog;
pub mod chain;
pub mod compose;
pub mod config;
pub mod document;
pub mod errors;
pub mod generate;
pub mod merge;
pub mod notify;
pub mod pipeline;
pub mod publish;
pub mod retry;
pub mod sandbox;
pub mod schema;
pub mod workspace;

pub use config::EngineConfig;
pub use pipeline::{ScaffoldEngine, ScaffoldRequest};
