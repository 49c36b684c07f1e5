//! Assembles a [`Dispatcher`] from declarations, factories and settings.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{debug, info};
use trellis_config::Config;
use trellis_core::{AppId, ApplicationContext, FeatureDescriptor, FeatureResult};
use trellis_permissions::{
    GateConfig, HostDecision, PermissionGate, PermissionHost, UserDecision,
};

use crate::callback::CallbackRegistry;
use crate::dispatcher::Dispatcher;
use crate::error::{BridgeError, BridgeResult, RegistryError};
use crate::executor::AsyncInvocationExecutor;
use crate::feature::{Feature, FeatureFactories};
use crate::instance::ExtensionInstanceManager;
use crate::manifest;
use crate::registry::RegistryBuilder;

/// Runtime tunables of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Permission gate behaviour.
    pub gate: GateConfig,
    /// How long a graceful disposal waits for running calls.
    pub graceful_dispose_timeout: Duration,
    /// Hold ASYNC and CALLBACK execution until the script reports ready.
    pub defer_until_ready: bool,
    /// Readiness poll interval for deferred execution.
    pub ready_poll_interval: Duration,
    /// Lane backlog above which a warning is logged.
    pub lane_capacity_hint: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for BridgeSettings {
    fn from(config: &Config) -> Self {
        Self {
            gate: GateConfig {
                prompt_timeout: Duration::from_secs(config.permissions.prompt_timeout_secs),
                cache_decisions: config.permissions.cache_decisions,
            },
            graceful_dispose_timeout: Duration::from_millis(
                config.lifecycle.graceful_dispose_timeout_ms,
            ),
            defer_until_ready: config.script.defer_until_ready,
            ready_poll_interval: Duration::from_millis(config.script.ready_poll_interval_ms.max(1)),
            lane_capacity_hint: config.executor.lane_capacity_hint.max(1),
        }
    }
}

/// Host used when none is supplied: every permission is refused.
struct DenyAllHost;

#[async_trait]
impl PermissionHost for DenyAllHost {
    fn check_permissions(&self, _app: &AppId, permissions: &[String]) -> Vec<HostDecision> {
        vec![HostDecision::Denied; permissions.len()]
    }

    async fn prompt_user(&self, _app: &AppId, _permission: &str) -> Option<UserDecision> {
        None
    }
}

/// Staged construction of a [`Dispatcher`].
///
/// ```no_run
/// # use std::sync::Arc;
/// # use trellis_bridge::BridgeBuilder;
/// # fn host() -> Arc<dyn trellis_permissions::PermissionHost> { unimplemented!() }
/// # fn main() -> trellis_bridge::BridgeResult<()> {
/// let mut builder = BridgeBuilder::new();
/// builder
///     .permission_host(host())
///     .load_manifest("features.toml".as_ref())?;
/// let dispatcher = builder.build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct BridgeBuilder {
    settings: BridgeSettings,
    registry: RegistryBuilder,
    factories: FeatureFactories,
    host: Option<Arc<dyn PermissionHost>>,
    runtime: Option<Handle>,
}

impl BridgeBuilder {
    /// A builder with default settings and no features.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the settings.
    pub fn settings(&mut self, settings: BridgeSettings) -> &mut Self {
        self.settings = settings;
        self
    }

    /// Take the settings from a loaded configuration.
    pub fn with_config(&mut self, config: &Config) -> &mut Self {
        self.settings(BridgeSettings::from(config))
    }

    /// The host consulted by the permission gate.
    pub fn permission_host(&mut self, host: Arc<dyn PermissionHost>) -> &mut Self {
        self.host = Some(host);
        self
    }

    /// Run asynchronous work on this runtime instead of the ambient one.
    pub fn runtime(&mut self, handle: Handle) -> &mut Self {
        self.runtime = Some(handle);
        self
    }

    /// Declare a feature and provide its constructor.
    ///
    /// # Errors
    ///
    /// Returns a registry error if the declaration is malformed or clashes
    /// with an earlier one.
    pub fn register_feature<F>(
        &mut self,
        descriptor: FeatureDescriptor,
        factory: F,
    ) -> BridgeResult<&mut Self>
    where
        F: Fn(&ApplicationContext) -> FeatureResult<Arc<dyn Feature>> + Send + Sync + 'static,
    {
        let name = descriptor.name().to_owned();
        self.registry.register(descriptor)?;
        self.factories.register(name, factory);
        Ok(self)
    }

    /// Declare a feature whose constructor is provided separately.
    ///
    /// # Errors
    ///
    /// As for [`register_feature`](Self::register_feature).
    pub fn declare(&mut self, descriptor: FeatureDescriptor) -> BridgeResult<&mut Self> {
        self.registry.register(descriptor)?;
        Ok(self)
    }

    /// Provide the constructor for a declared feature.
    pub fn factory<F>(&mut self, feature: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ApplicationContext) -> FeatureResult<Arc<dyn Feature>> + Send + Sync + 'static,
    {
        self.factories.register(feature, factory);
        self
    }

    /// Declare every feature in a manifest file.
    ///
    /// # Errors
    ///
    /// Returns the manifest or registry error that stopped loading.
    pub fn load_manifest(&mut self, path: &Path) -> BridgeResult<&mut Self> {
        let features = manifest::load_manifest(path)?;
        self.registry.register_all(features)?;
        Ok(self)
    }

    /// Declare every feature in the manifests of a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or a declaration
    /// clashes with an earlier one.
    pub fn load_manifest_dir(&mut self, dir: &Path) -> BridgeResult<&mut Self> {
        let features = manifest::load_manifests_from_dir(dir)?;
        self.registry.register_all(features)?;
        Ok(self)
    }

    /// Freeze the registry and wire the dispatcher.
    ///
    /// Without a permission host every permission-guarded action is denied.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MissingFactory`] if a declared feature has no
    /// constructor, or [`BridgeError::Runtime`] if no runtime was supplied
    /// and none is running.
    pub fn build(self) -> BridgeResult<Arc<Dispatcher>> {
        if let Some(feature) = self
            .registry
            .feature_names()
            .find(|name| !self.factories.contains(name))
        {
            return Err(RegistryError::MissingFactory {
                feature: feature.to_owned(),
            }
            .into());
        }

        let handle = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| BridgeError::Runtime(e.to_string()))?,
        };
        let executor = Arc::new(
            AsyncInvocationExecutor::new(handle)
                .with_capacity_hint(self.settings.lane_capacity_hint),
        );
        let callbacks = Arc::new(CallbackRegistry::new(Arc::clone(&executor)));
        let instances = Arc::new(ExtensionInstanceManager::new(
            self.factories,
            Arc::clone(&callbacks),
            self.settings.graceful_dispose_timeout,
        ));

        let host = self.host.unwrap_or_else(|| {
            debug!("No permission host supplied, denying guarded actions");
            Arc::new(DenyAllHost)
        });
        let gate = Arc::new(PermissionGate::with_config(host, self.settings.gate));

        let registry = self.registry.build();
        info!(features = registry.len(), "Bridge built");
        Ok(Dispatcher::new(
            registry,
            gate,
            instances,
            callbacks,
            executor,
            self.settings,
        ))
    }
}
