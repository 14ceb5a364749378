//! Domain model for the panorama stitching service.
//!
//! Everything in this crate is free of network and database access so the
//! job state machine, the failure taxonomy and the output heuristic can be
//! tested in isolation. The subprocess runner in [`process`] is the one
//! piece of I/O that lives here because both the remote transport and the
//! local host share it.

pub mod error;
pub mod failure;
pub mod job;
pub mod naming;
pub mod process;
pub mod resolver;
pub mod store;
pub mod trace;
pub mod types;
