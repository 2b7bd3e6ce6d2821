//! Dataport Adapter Contract
//!
//! The [`DataAdapter`] trait every backend implements, plus the pieces the
//! backends share:
//! - HTTP transport seam with a reqwest implementation and a scripted one
//! - Session-expiry classification and the session store collaborator
//! - Realtime subscription registry
//! - Upload validation and storage path generation
//! - An in-memory adapter for development and testing

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod memory;
pub mod realtime;
pub mod session;
pub mod transport;
pub mod upload;

pub use adapter::{Capabilities, DataAdapter, RecordId, RecordTarget, Target};
pub use memory::InMemoryAdapter;
pub use realtime::{ChangeCallback, ChangeEvent, RealtimeHandle, RealtimeTransport, SubscriptionRegistry};
pub use session::{is_auth_error, AuthErrorSignal, InMemorySessionStore, SessionStore};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, ScriptedTransport};
pub use upload::{FileInput, FileUpload, UploadParams, UploadedFile};

pub use dataport_common::{DataProviderResponse, Error, Result};
pub use dataport_query::{QueryFilter, QueryParams};
