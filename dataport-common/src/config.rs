//! Configuration types for dataport adapters

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which backend the application talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Rest,
    Supabase,
    /// Process-local tables, nothing leaves the process
    Memory,
}

/// Main configuration for an adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataportConfig {
    /// Backend selection (default: rest)
    pub backend: BackendKind,
    /// Base URL of the REST API or Supabase project
    pub base_url: String,
    /// API token (the anon key for Supabase)
    pub token: Option<String>,
    /// Extra headers sent with every request
    pub headers: HashMap<String, String>,
    /// Request timeout in seconds, enforced by the transport (default: 10)
    pub timeout_secs: u64,
    /// Default upload target
    pub storage: StorageConfig,
    /// REST backend settings
    pub rest: RestConfig,
    /// Supabase backend settings
    pub supabase: SupabaseConfig,
}

impl Default for DataportConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Rest,
            base_url: "http://localhost:8000/api".to_string(),
            token: None,
            headers: HashMap::new(),
            timeout_secs: 10,
            storage: StorageConfig::default(),
            rest: RestConfig::default(),
            supabase: SupabaseConfig::default(),
        }
    }
}

/// Upload target description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Disk or bucket name
    pub disk: Option<String>,
    /// Directory prefix inside the resource folder
    pub directory: Option<String>,
    /// Whether uploaded objects are publicly readable
    pub public: Option<bool>,
    /// Allowed MIME types (None = all allowed)
    pub allowed_types: Option<Vec<String>>,
}

impl StorageConfig {
    /// Overlay `other` on top of `self`; fields unset in `other` keep their value.
    #[must_use]
    pub fn merge(&self, other: &StorageConfig) -> StorageConfig {
        StorageConfig {
            disk: other.disk.clone().or_else(|| self.disk.clone()),
            directory: other.directory.clone().or_else(|| self.directory.clone()),
            public: other.public.or(self.public),
            allowed_types: other
                .allowed_types
                .clone()
                .or_else(|| self.allowed_types.clone()),
        }
    }

    /// Check if a MIME type is allowed
    pub fn is_type_allowed(&self, mime_type: &str) -> bool {
        self.allowed_types
            .as_ref()
            .map_or(true, |types| types.iter().any(|t| t == mime_type))
    }
}

/// Generic REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub sign_in_path: String,
    pub sign_up_path: String,
    pub sign_out_path: String,
    /// Appended to `/{resource}` for uploads
    pub upload_suffix: String,
    /// Appended to `/{resource}` for counts
    pub count_suffix: String,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            sign_in_path: "/auth/signin".to_string(),
            sign_up_path: "/auth/signup".to_string(),
            sign_out_path: "/auth/signout".to_string(),
            upload_suffix: "upload".to_string(),
            count_suffix: "count".to_string(),
        }
    }
}

/// Supabase project configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupabaseConfig {
    /// Database schema exposed through PostgREST (default: "public")
    pub schema: String,
    /// Table linking auth users to application profiles
    pub profile_link_table: String,
    /// Table linking profiles to roles
    pub user_roles_table: String,
    /// Roles table, joined to permissions through `role_permissions`
    pub roles_table: String,
    /// Bucket used when the storage config names none
    pub default_bucket: String,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            profile_link_table: "user_profile_links".to_string(),
            user_roles_table: "user_roles".to_string(),
            roles_table: "roles".to_string(),
            default_bucket: "default".to_string(),
        }
    }
}
