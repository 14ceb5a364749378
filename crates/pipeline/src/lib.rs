//! Stitching job pipeline.
//!
//! Turns a [`JobRequest`](pivot_core::job::JobRequest) into a published
//! panorama: sources are fetched and staged locally, shipped to the compute
//! host, run through the two-phase engine invocation, and the resolved output
//! is pulled back. [`orchestrator::JobOrchestrator`] sequences the stages;
//! everything else is a collaborator it drives.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod orchestrator;
pub mod remote;
pub mod source;
pub mod transport;
pub mod workspace;
