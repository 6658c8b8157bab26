//! Config & auth (C11) — resolves an inbound bearer token to a principal.
//! Generalizes the teacher's `AuthGuard` (one shared secret compared
//! constant-time against a single daemon token) into per-key resolution
//! against the relational store, while keeping its admin-token-as-
//! synthetic-principal idea and its constant-time-comparison discipline
//! for the one secret that still is a single shared value.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::models::{Key, Role, User};
use crate::store::Store;

type HmacSha256 = Hmac<Sha256>;

/// A resolved caller. The admin token resolves to a synthetic principal
/// with no backing `Key` row — generalizing the teacher's "admin token"
/// idea into this system's `Role::Admin`.
pub enum Principal {
    Keyed { user: User, key: Key },
    Admin,
}

impl Principal {
    pub fn role(&self) -> Role {
        match self {
            Principal::Keyed { user, .. } => user.role,
            Principal::Admin => Role::Admin,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Principal::Keyed { user, .. } => Some(user.id),
            Principal::Admin => None,
        }
    }

    pub fn key_id(&self) -> Option<Uuid> {
        match self {
            Principal::Keyed { key, .. } => Some(key.id),
            Principal::Admin => None,
        }
    }

    pub fn key_budgets(&self) -> Option<crate::models::CostBudgets> {
        match self {
            Principal::Keyed { key, .. } => Some(key.budgets),
            Principal::Admin => None,
        }
    }

    /// For control-plane (admin UI) calls, a false `web_login_capable`
    /// flag denies authentication; for proxy calls it is ignored (§4.11).
    pub fn web_login_allowed(&self) -> bool {
        match self {
            Principal::Keyed { key, .. } => key.web_login_capable,
            Principal::Admin => true,
        }
    }
}

pub struct AuthResolver {
    admin_token: String,
}

impl AuthResolver {
    pub fn new(admin_token: String) -> Self {
        Self { admin_token }
    }

    /// Resolves a bearer token for a data-plane (proxy) call. The
    /// `web_login_only` flag is ignored here by construction — callers
    /// never check it on this path.
    pub fn resolve_proxy(&self, store: &Store, token: &str) -> Option<Principal> {
        if !self.admin_token.is_empty() && constant_time_eq(token, &self.admin_token) {
            return Some(Principal::Admin);
        }
        let (user, key) = store.resolve_key(token).ok()??;
        Some(Principal::Keyed { user, key })
    }

    /// Resolves a bearer/session token for a control-plane (admin UI)
    /// call and additionally requires `web_login_capable` / admin role.
    pub fn resolve_control_plane(&self, store: &Store, token: &str) -> Option<Principal> {
        let principal = self.resolve_proxy(store, token)?;
        if !principal.web_login_allowed() {
            return None;
        }
        Some(principal)
    }

    /// Resolves a data-plane bearer token, distinguishing "no such
    /// key/admin token" (401, `AuthFailed`) from "key exists but is
    /// disabled or expired" (403, `KeyDisabled`) — the HTTP layer needs
    /// both outcomes (§6).
    pub fn resolve_proxy_checked(
        &self,
        store: &Store,
        token: &str,
    ) -> Result<Principal, GatewayError> {
        if !self.admin_token.is_empty() && constant_time_eq(token, &self.admin_token) {
            return Ok(Principal::Admin);
        }
        let (user, key) = store
            .resolve_key_raw(token)
            .map_err(GatewayError::Other)?
            .ok_or(GatewayError::AuthFailed)?;
        if !key.is_active() || !user.enabled {
            return Err(GatewayError::KeyDisabled);
        }
        Ok(Principal::Keyed { user, key })
    }
}

/// HMAC-based constant-time comparison, avoiding a dependency on the
/// `subtle` crate for a single string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let key = b"gateway-constant-time-comparison-key";
    let mut mac_a = HmacSha256::new_from_slice(key).unwrap();
    let mut mac_b = HmacSha256::new_from_slice(key).unwrap();
    mac_a.update(a.as_bytes());
    mac_b.update(b.as_bytes());
    mac_a.finalize().into_bytes() == mac_b.finalize().into_bytes()
}
