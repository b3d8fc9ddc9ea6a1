//! # cratus-core
//!
//! Core types shared by the Cratus directory client.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy for directory operations
//! - [`config`] - Connection options, schema mapping and layered settings loading

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{ConnectionOptions, ConnectionOptionsBuilder, SchemaConfig, Settings};
pub use error::{Error, Result};
