//! Application layer: configuration, collaborator bootstrap and the
//! retrieve → generate → review → apply pipeline.

pub mod bootstrap;
pub mod config;
pub mod pipeline;

pub use config::Config;
pub use pipeline::{AutoApprove, Confirmer, QueryOutcome, QueryProcessor};
