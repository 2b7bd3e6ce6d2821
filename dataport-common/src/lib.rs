//! Dataport Common Types and Utilities
//!
//! Shared configuration, error taxonomy, domain types and the uniform
//! response envelope returned by every data adapter.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod response;
pub mod types;

pub use config::{DataportConfig, StorageConfig};
pub use error::{Error, Result, TransportError};
pub use response::DataProviderResponse;
