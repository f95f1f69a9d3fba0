//! # BOS Common
//!
//! Shared error types for the BrowserOS server supervisor crates.

pub mod errors;

pub use errors::{ServerError, ServerResult};
