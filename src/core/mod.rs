//! Core domain models for pipewright
//!
//! This module defines the fundamental data structures that represent
//! pipelines, stages, their configuration and the state of a run.

pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod graph;
pub mod params;
pub mod pipeline;
pub mod stage;
pub mod state;

pub use context::*;
pub use credentials::{CredentialError, CredentialLease, CredentialProvider, EnvCredentialProvider, Secret};
pub use error::PipelineError;
pub use graph::StageGraph;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
