//! Dataport - backend-agnostic data access
//!
//! One [`DataAdapter`] contract for CRUD, pagination, filtering, uploads,
//! realtime and authentication, with interchangeable backends:
//! - [`RestAdapter`] for a generic JSON REST API
//! - [`SupabaseAdapter`] for Supabase projects
//! - [`InMemoryAdapter`] for development and tests
//!
//! Every operation resolves to a [`DataProviderResponse`] envelope.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;

use tracing::info;

pub use dataport_adapter as adapter;
pub use dataport_common as common;
pub use dataport_query as query;

pub use dataport_adapter::{
    Capabilities, DataAdapter, InMemoryAdapter, InMemorySessionStore, RecordId, RecordTarget, SessionStore,
};
pub use dataport_common::config::{BackendKind, DataportConfig};
pub use dataport_common::{DataProviderResponse, Error, Result};
pub use dataport_query::{QueryFilter, QueryParams};
pub use dataport_rest::RestAdapter;
pub use dataport_supabase::SupabaseAdapter;

/// Build the adapter selected by `config.backend`
pub fn connect(config: &DataportConfig, session: Arc<dyn SessionStore>) -> Result<Arc<dyn DataAdapter>> {
    info!(backend = ?config.backend, base_url = %config.base_url, "creating data adapter");
    Ok(match config.backend {
        BackendKind::Rest => Arc::new(RestAdapter::new(config, session)?),
        BackendKind::Supabase => Arc::new(SupabaseAdapter::new(config, session)?),
        BackendKind::Memory => Arc::new(InMemoryAdapter::new()),
    })
}
