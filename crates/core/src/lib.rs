//! Domain types for the sifherd build orchestrator.
//!
//! Nothing in this crate performs I/O; the types here are shared by the
//! transport adapters, the reconciliation engine and the CLI.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::{CoreError, Result};
