//! Common types shared by every adapter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Auth Types
// ============================================================================

/// Permission attached to a role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub guard_name: String,
}

/// Role with its permissions already flattened in
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub guard_name: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Authenticated user as seen by the application.
///
/// Roles and permissions are pre-resolved so that permission checks never
/// need another backend round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl AuthUser {
    /// `Authorization` header value for this user, if a token is held
    pub fn authorization(&self) -> Option<String> {
        self.access_token.as_ref().map(|token| {
            format!(
                "{} {}",
                self.token_type.as_deref().unwrap_or("Bearer"),
                token
            )
        })
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.name == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p.name == permission)
            || self
                .roles
                .iter()
                .flat_map(|r| r.permissions.iter())
                .any(|p| p.name == permission)
    }

    /// Whether `expires_at` (unix seconds) lies in the past; unknown expiry never expires
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .is_some_and(|expires_at| expires_at <= now.timestamp())
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

// ============================================================================
// Query Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    pub fn is_ascending(self) -> bool {
        self == Self::Asc
    }
}

/// One ordering key; the first in a list is the primary key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCondition {
    pub field: String,
    pub order: SortOrder,
}

impl SortCondition {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Page request, 1-indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub per_page: u64,
}

impl Pagination {
    pub fn new(page: u64, per_page: u64) -> Self {
        Self { page, per_page }
    }

    /// Zero-indexed inclusive offset range `[from, to]`, clamped at `u64::MAX`
    pub fn range(&self) -> (u64, u64) {
        let from = self.page.saturating_sub(1).saturating_mul(self.per_page);
        let to = from.saturating_add(self.per_page.saturating_sub(1));
        (from, to)
    }
}

/// A page of rows plus the effective pagination reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedData<T> {
    pub current_page: u64,
    pub per_page: u64,
    pub total: u64,
    pub last_page: u64,
    pub from: Option<u64>,
    pub to: Option<u64>,
    pub data: Vec<T>,
}

impl<T> PaginatedData<T> {
    /// Build page metadata; `offset` is the zero-indexed position of the first row.
    pub fn new(data: Vec<T>, offset: u64, per_page: u64, total: u64) -> Self {
        let current_page = if per_page == 0 { 1 } else { offset / per_page + 1 };
        let last_page = if per_page == 0 {
            1
        } else {
            total.div_ceil(per_page).max(1)
        };
        let (from, to) = if data.is_empty() {
            (None, None)
        } else {
            (Some(offset + 1), Some(offset + data.len() as u64))
        };
        Self {
            current_page,
            per_page,
            total,
            last_page,
            from,
            to,
            data,
        }
    }
}
