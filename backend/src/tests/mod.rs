// Shared test setup: in-memory collaborators and pipeline-level scenarios
pub mod fixtures;
pub mod helpers;
pub mod integration;
