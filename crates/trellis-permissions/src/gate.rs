//! Permission gate - decides whether an invocation may proceed.
//!
//! # Check Flow
//!
//! 1. Remembered decisions answer first (unless the action prompts every time)
//! 2. The remaining permissions go to the host in one batch
//! 3. Any denial short-circuits to [`GateOutcome::Deny`]
//! 4. If everything is granted, [`GateOutcome::Grant`]
//! 5. Otherwise [`GateOutcome::Prompt`] carries the undetermined permissions
//!
//! Resolving a prompt takes a single-permit semaphore so only one dialog is
//! on screen at a time, re-reads the store once the permit is held, and gives
//! up after the configured timeout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use trellis_core::{AppId, PromptStrategy};

use crate::error::{PermissionError, PermissionResult};
use crate::host::{HostDecision, PermissionHost};
use crate::store::GrantStore;

/// Default prompt timeout (60 seconds).
const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables for the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    /// How long a prompt may stay unanswered before it counts as a denial.
    pub prompt_timeout: Duration,
    /// Whether remembered decisions are stored and consulted.
    pub cache_decisions: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
            cache_decisions: true,
        }
    }
}

/// The outcome of a permission check.
#[derive(Debug)]
pub enum GateOutcome {
    /// Every permission is granted - proceed.
    Grant,
    /// A permission is refused - answer `NO_PERMISSION`.
    Deny(PermissionError),
    /// The user must be asked first.
    Prompt(PendingDecision),
}

impl GateOutcome {
    /// Check if this outcome allows the invocation to proceed.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Grant)
    }

    /// Check if this outcome refuses the invocation.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }
}

/// The permission gate.
///
/// Cheap to share behind an `Arc`; all state is internally synchronized.
pub struct PermissionGate {
    host: Arc<dyn PermissionHost>,
    store: Arc<GrantStore>,
    prompt_permit: Arc<Semaphore>,
    config: GateConfig,
}

impl PermissionGate {
    /// Create a gate with default configuration and an empty store.
    #[must_use]
    pub fn new(host: Arc<dyn PermissionHost>) -> Self {
        Self::with_config(host, GateConfig::default())
    }

    /// Create a gate with explicit configuration.
    #[must_use]
    pub fn with_config(host: Arc<dyn PermissionHost>, config: GateConfig) -> Self {
        Self {
            host,
            store: Arc::new(GrantStore::new()),
            prompt_permit: Arc::new(Semaphore::new(1)),
            config,
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> GateConfig {
        self.config
    }

    /// The remembered-decision store.
    #[must_use]
    pub fn store(&self) -> &GrantStore {
        &self.store
    }

    /// Evaluate `permissions` for `app` without waiting on the user.
    #[must_use]
    pub fn check(
        &self,
        app: &AppId,
        permissions: &[String],
        strategy: PromptStrategy,
    ) -> GateOutcome {
        if permissions.is_empty() {
            return GateOutcome::Grant;
        }

        let use_cache = self.config.cache_decisions && strategy == PromptStrategy::FirstTime;

        // Step 1: remembered decisions
        let mut remaining = Vec::with_capacity(permissions.len());
        for permission in permissions {
            match use_cache.then(|| self.store.get(app, permission)).flatten() {
                Some(true) => {},
                Some(false) => {
                    tracing::debug!(app = %app, permission = %permission, "remembered denial");
                    return GateOutcome::Deny(PermissionError::Denied {
                        permission: permission.clone(),
                    });
                },
                None => remaining.push(permission.clone()),
            }
        }
        if remaining.is_empty() {
            return GateOutcome::Grant;
        }

        // Step 2: host state
        let decisions = self.host.check_permissions(app, &remaining);
        let mut undetermined = Vec::new();
        for (index, permission) in remaining.into_iter().enumerate() {
            let decision = decisions
                .get(index)
                .copied()
                .unwrap_or(HostDecision::Undetermined);
            match decision {
                HostDecision::Denied => {
                    tracing::debug!(app = %app, permission = %permission, "host denied permission");
                    return GateOutcome::Deny(PermissionError::Denied { permission });
                },
                HostDecision::Granted if strategy == PromptStrategy::FirstTime => {},
                HostDecision::Granted | HostDecision::Undetermined => undetermined.push(permission),
            }
        }
        if undetermined.is_empty() {
            return GateOutcome::Grant;
        }

        // Step 3: the user decides
        tracing::debug!(app = %app, permissions = ?undetermined, "permission prompt required");
        GateOutcome::Prompt(PendingDecision {
            host: Arc::clone(&self.host),
            store: Arc::clone(&self.store),
            prompt_permit: Arc::clone(&self.prompt_permit),
            config: self.config,
            app: app.clone(),
            permissions: undetermined,
            use_cache,
        })
    }

    /// Forget every remembered decision for `app`.
    pub fn revoke(&self, app: &AppId) {
        let removed = self.store.revoke(app);
        tracing::info!(app = %app, removed, "revoked remembered permission decisions");
    }

    /// Forget the remembered decision for one permission.
    pub fn revoke_permission(&self, app: &AppId, permission: &str) {
        if self.store.revoke_permission(app, permission) {
            tracing::info!(app = %app, permission = %permission, "revoked permission decision");
        }
    }
}

impl fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionGate")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A check that is waiting on the user.
///
/// Owns everything it needs, so it can be moved to another task and resolved
/// there.
pub struct PendingDecision {
    host: Arc<dyn PermissionHost>,
    store: Arc<GrantStore>,
    prompt_permit: Arc<Semaphore>,
    config: GateConfig,
    app: AppId,
    permissions: Vec<String>,
    use_cache: bool,
}

impl PendingDecision {
    /// Permissions the user will be asked about, in order.
    #[must_use]
    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    /// Application the prompt is for.
    #[must_use]
    pub fn app(&self) -> &AppId {
        &self.app
    }

    /// Prompt for each permission in turn.
    ///
    /// # Errors
    ///
    /// Returns the first [`PermissionError`] encountered: a remembered or
    /// explicit rejection, a dismissed dialog, or a timeout.
    pub async fn resolve(self) -> PermissionResult<()> {
        for permission in &self.permissions {
            self.resolve_one(permission).await?;
        }
        Ok(())
    }

    async fn resolve_one(&self, permission: &str) -> PermissionResult<()> {
        // A closed semaphore would mean the gate is gone; fall through and prompt anyway.
        let _permit = self.prompt_permit.acquire().await.ok();

        // Another prompt may have answered this while we waited.
        if self.use_cache
            && let Some(granted) = self.store.get(&self.app, permission)
        {
            return if granted {
                Ok(())
            } else {
                Err(PermissionError::Denied {
                    permission: permission.to_string(),
                })
            };
        }

        let timeout = self.config.prompt_timeout;
        let answer =
            tokio::time::timeout(timeout, self.host.prompt_user(&self.app, permission)).await;

        match answer {
            Err(_) => {
                tracing::warn!(app = %self.app, permission = %permission, "permission prompt timed out");
                Err(PermissionError::Timeout {
                    permission: permission.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            },
            Ok(None) => Err(PermissionError::Dismissed {
                permission: permission.to_string(),
            }),
            Ok(Some(decision)) => {
                if decision.remember && self.use_cache {
                    self.store.record(&self.app, permission, decision.granted);
                }
                tracing::debug!(
                    app = %self.app,
                    permission = %permission,
                    granted = decision.granted,
                    remember = decision.remember,
                    "permission prompt answered"
                );
                if decision.granted {
                    Ok(())
                } else {
                    Err(PermissionError::Rejected {
                        permission: permission.to_string(),
                    })
                }
            },
        }
    }
}

impl fmt::Debug for PendingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDecision")
            .field("app", &self.app)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
