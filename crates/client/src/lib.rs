//! HTTP collaborators for the marking desk
//!
//! Implements the marking, question, blob and query service traits from
//! `marking-core` against the assessment REST API using a blocking `ureq`
//! agent. Calls are made from the surface's worker threads, never the UI
//! thread.

pub mod client;
pub mod endpoints;
pub mod error;

pub use client::HttpMarkingService;
pub use endpoints::Endpoints;
pub use error::{ClientError, Result};
