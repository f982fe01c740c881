//! Output writers.
//!
//! - [`json`]: writes a [`crate::models::FetchResponse`] to a dated JSON file
//!
//! Without an output directory the CLI prints the response to stdout instead.

pub mod json;
