//! In-memory store for remembered permission decisions.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use trellis_core::AppId;

/// Remembered decisions keyed by (application, permission).
///
/// Thread-safe via internal [`RwLock`]; poisoned locks are recovered.
pub struct GrantStore {
    decisions: RwLock<HashMap<AppId, HashMap<String, bool>>>,
}

impl GrantStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decisions: RwLock::new(HashMap::new()),
        }
    }

    /// The remembered decision for one permission, if any.
    #[must_use]
    pub fn get(&self, app: &AppId, permission: &str) -> Option<bool> {
        let store = self.decisions.read().unwrap_or_else(|e| {
            tracing::warn!("GrantStore read lock poisoned, recovering");
            e.into_inner()
        });
        store.get(app).and_then(|perms| perms.get(permission)).copied()
    }

    /// Remember a decision, replacing any earlier one.
    pub fn record(&self, app: &AppId, permission: &str, granted: bool) {
        let mut store = self.decisions.write().unwrap_or_else(|e| {
            tracing::warn!("GrantStore lock poisoned, recovering");
            e.into_inner()
        });
        store
            .entry(app.clone())
            .or_default()
            .insert(permission.to_string(), granted);
    }

    /// Forget every decision for an application.
    ///
    /// Returns the number of decisions removed.
    pub fn revoke(&self, app: &AppId) -> usize {
        let mut store = self.decisions.write().unwrap_or_else(|e| {
            tracing::warn!("GrantStore lock poisoned, recovering");
            e.into_inner()
        });
        store.remove(app).map_or(0, |perms| perms.len())
    }

    /// Forget one decision. Returns whether it existed.
    pub fn revoke_permission(&self, app: &AppId, permission: &str) -> bool {
        let mut store = self.decisions.write().unwrap_or_else(|e| {
            tracing::warn!("GrantStore lock poisoned, recovering");
            e.into_inner()
        });
        let Some(perms) = store.get_mut(app) else {
            return false;
        };
        let removed = perms.remove(permission).is_some();
        if perms.is_empty() {
            store.remove(app);
        }
        removed
    }

    /// Total number of remembered decisions.
    #[must_use]
    pub fn count(&self) -> usize {
        let store = self.decisions.read().unwrap_or_else(|e| {
            tracing::warn!("GrantStore read lock poisoned, recovering");
            e.into_inner()
        });
        store.values().map(HashMap::len).sum()
    }
}

impl Default for GrantStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GrantStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantStore")
            .field("count", &self.count())
            .finish()
    }
}
