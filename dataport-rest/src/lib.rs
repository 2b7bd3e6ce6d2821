//! REST Data Adapter
//!
//! Talks to a JSON REST API laid out as `/{resource}` collections:
//! - Reads serialize filter, sort, include and pagination into bracketed
//!   query parameters
//! - Uploads are multipart posts to `/{resource}/upload`
//! - Requests carry the session's bearer token; a 401 resets the session

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod adapter;

pub use adapter::RestAdapter;
