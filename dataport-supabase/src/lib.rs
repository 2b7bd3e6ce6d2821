//! Supabase Data Adapter
//!
//! Implements `DataAdapter` on top of a Supabase project's HTTP APIs:
//! - PostgREST for table reads and writes, with filters compiled by
//!   `dataport-query`
//! - GoTrue for password and OAuth sign-in, with the signed-in user's
//!   profile, roles and permissions resolved up front
//! - Storage buckets for uploads
//!
//! JWT failures (`PGRST301`, expired tokens, 401) clear the session store.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod adapter;
mod auth;
pub mod postgrest;
mod storage;

pub use adapter::SupabaseAdapter;
