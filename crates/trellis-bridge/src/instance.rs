//! Extension instance lifecycle.
//!
//! One instance per (feature, application) pair. Each pair has its own slot
//! lock; creation and disposal for a pair hold it, so they never overlap and
//! concurrent first calls all receive the one instance built by whichever
//! caller got the lock first. Slots for different pairs never contend.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};
use trellis_core::{AppId, ApplicationContext, FeatureError};

use crate::callback::{CallbackRegistry, InstanceId};
use crate::error::{InstanceError, InstanceResult};
use crate::feature::{Feature, FeatureFactories};

type Slot = Arc<Mutex<Option<Arc<ExtensionInstance>>>>;

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| {
        warn!(lock = what, "Lock poisoned, recovering");
        e.into_inner()
    })
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "feature panicked".to_owned()
    }
}

/// A live feature bound to one application.
pub struct ExtensionInstance {
    id: InstanceId,
    feature_name: String,
    app: Arc<ApplicationContext>,
    feature: Arc<dyn Feature>,
    in_flight: Mutex<usize>,
    drained: Condvar,
    disposed: AtomicBool,
}

impl ExtensionInstance {
    /// Unique id; a re-created instance gets a new one.
    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// The feature name.
    #[must_use]
    pub fn feature_name(&self) -> &str {
        &self.feature_name
    }

    /// The owning application.
    #[must_use]
    pub fn app(&self) -> &Arc<ApplicationContext> {
        &self.app
    }

    /// The feature implementation.
    #[must_use]
    pub fn feature(&self) -> &Arc<dyn Feature> {
        &self.feature
    }

    /// Calls currently executing.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        *lock(&self.in_flight, "in_flight")
    }

    /// Whether the instance has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> CallGuard {
        let mut calls = lock(&self.in_flight, "in_flight");
        *calls = calls.saturating_add(1);
        CallGuard {
            instance: Arc::clone(self),
        }
    }

    /// Wait until no call is executing. Returns the remaining count on
    /// timeout.
    fn wait_idle(&self, timeout: Duration) -> Result<(), usize> {
        let deadline = Instant::now().checked_add(timeout);
        let mut calls = lock(&self.in_flight, "in_flight");
        while *calls > 0 {
            let remaining = deadline
                .map_or(timeout, |d| d.saturating_duration_since(Instant::now()));
            if remaining.is_zero() {
                return Err(*calls);
            }
            calls = self
                .drained
                .wait_timeout(calls, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| {
                    warn!("Instance drain wait poisoned, recovering");
                    e.into_inner().0
                });
        }
        Ok(())
    }

    fn teardown(&self, force: bool) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.feature.dispose(force)));
        if let Err(payload) = outcome {
            warn!(
                feature = %self.feature_name,
                instance = %self.id,
                error = %panic_message(payload.as_ref()),
                "Feature panicked during dispose"
            );
        }
    }
}

impl fmt::Debug for ExtensionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionInstance")
            .field("id", &self.id)
            .field("feature", &self.feature_name)
            .field("app", self.app.app_id())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Counts one executing call for as long as it lives.
pub struct CallGuard {
    instance: Arc<ExtensionInstance>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let mut calls = lock(&self.instance.in_flight, "in_flight");
        *calls = calls.saturating_sub(1);
        if *calls == 0 {
            self.instance.drained.notify_all();
        }
    }
}

/// An instance plus the call guard taken when it was resolved.
pub struct InstanceLease {
    instance: Arc<ExtensionInstance>,
    _guard: CallGuard,
}

impl InstanceLease {
    /// The leased instance.
    #[must_use]
    pub fn instance(&self) -> &Arc<ExtensionInstance> {
        &self.instance
    }
}

/// Creates, caches and disposes extension instances.
pub struct ExtensionInstanceManager {
    factories: FeatureFactories,
    slots: DashMap<(String, AppId), Slot>,
    callbacks: Arc<CallbackRegistry>,
    graceful_timeout: Duration,
}

impl ExtensionInstanceManager {
    /// A manager building instances from `factories`.
    #[must_use]
    pub fn new(
        factories: FeatureFactories,
        callbacks: Arc<CallbackRegistry>,
        graceful_timeout: Duration,
    ) -> Self {
        Self {
            factories,
            slots: DashMap::new(),
            callbacks,
            graceful_timeout,
        }
    }

    fn slot(&self, feature: &str, app: &AppId) -> Slot {
        self.slots
            .entry((feature.to_owned(), app.clone()))
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Return the instance for the pair, constructing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::FeatureNotRegistered`] if there is no
    /// factory, or [`InstanceError::Factory`] if construction or one of the
    /// setup hooks fails.
    pub fn get_or_create(
        &self,
        feature: &str,
        app: &Arc<ApplicationContext>,
    ) -> InstanceResult<Arc<ExtensionInstance>> {
        let slot = self.slot(feature, app.app_id());
        let mut current = lock(&*slot, "instance slot");
        self.ensure(&mut current, feature, app)
    }

    /// Like [`get_or_create`](Self::get_or_create), also counting a call in
    /// flight until the lease is dropped.
    ///
    /// # Errors
    ///
    /// As for [`get_or_create`](Self::get_or_create).
    pub fn acquire(
        &self,
        feature: &str,
        app: &Arc<ApplicationContext>,
    ) -> InstanceResult<InstanceLease> {
        let slot = self.slot(feature, app.app_id());
        let mut current = lock(&*slot, "instance slot");
        let instance = self.ensure(&mut current, feature, app)?;
        // Taken under the slot lock, so a graceful disposal sees it.
        let guard = instance.enter();
        Ok(InstanceLease {
            instance,
            _guard: guard,
        })
    }

    /// The live instance for the pair, without creating one.
    #[must_use]
    pub fn get(&self, feature: &str, app: &AppId) -> Option<Arc<ExtensionInstance>> {
        let slot = self.slots.get(&(feature.to_owned(), app.clone()))?.clone();
        let current = lock(&*slot, "instance slot");
        current.clone()
    }

    /// Dispose the instance for the pair.
    ///
    /// Without `force`, waits for running calls to finish first. With it,
    /// disposes immediately; whatever those calls deliver later is dropped.
    /// Returns whether there was an instance.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Busy`] if a graceful disposal times out. The
    /// instance stays in place.
    pub fn dispose(&self, feature: &str, app: &AppId, force: bool) -> InstanceResult<bool> {
        let Some(slot) = self
            .slots
            .get(&(feature.to_owned(), app.clone()))
            .map(|s| s.clone())
        else {
            return Ok(false);
        };
        let mut current = lock(&*slot, "instance slot");
        let Some(instance) = current.as_ref().map(Arc::clone) else {
            return Ok(false);
        };

        if !force && let Err(in_flight) = instance.wait_idle(self.graceful_timeout) {
            warn!(
                feature,
                app = %app,
                in_flight,
                "Graceful dispose timed out"
            );
            return Err(InstanceError::Busy {
                feature: feature.to_owned(),
                app: app.clone(),
                in_flight,
            });
        }

        *current = None;
        // Mark before purging so a caller registering a callback can tell it
        // lost the race.
        instance.disposed.store(true, Ordering::SeqCst);
        let purged = self.callbacks.purge_instance(instance.id);
        instance.teardown(force);
        info!(
            feature,
            app = %app,
            instance = %instance.id,
            force,
            purged,
            "Instance disposed"
        );
        Ok(true)
    }

    /// Dispose every instance of one application.
    ///
    /// Keeps going past failures and returns the first one after trying
    /// them all.
    ///
    /// # Errors
    ///
    /// Returns the first [`InstanceError::Busy`] encountered.
    pub fn dispose_app(&self, app: &AppId, force: bool) -> InstanceResult<usize> {
        let features: Vec<String> = self
            .slots
            .iter()
            .filter(|e| &e.key().1 == app)
            .map(|e| e.key().0.clone())
            .collect();
        let result = self.dispose_each(features.iter().map(|f| (f.as_str(), app)), force);
        // A detached application's slots are not coming back.
        self.slots.retain(|(_, owner), slot| {
            owner != app || lock(&**slot, "instance slot").is_some()
        });
        result
    }

    /// Dispose everything.
    ///
    /// # Errors
    ///
    /// Returns the first [`InstanceError::Busy`] encountered.
    pub fn dispose_all(&self, force: bool) -> InstanceResult<usize> {
        let keys: Vec<(String, AppId)> = self.slots.iter().map(|e| e.key().clone()).collect();
        self.dispose_each(keys.iter().map(|(f, a)| (f.as_str(), a)), force)
    }

    /// Number of live instances.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|e| lock(&**e.value(), "instance slot").is_some())
            .count()
    }

    fn dispose_each<'a>(
        &self,
        pairs: impl Iterator<Item = (&'a str, &'a AppId)>,
        force: bool,
    ) -> InstanceResult<usize> {
        let mut disposed: usize = 0;
        let mut first_error = None;
        for (feature, app) in pairs {
            match self.dispose(feature, app, force) {
                Ok(true) => disposed = disposed.saturating_add(1),
                Ok(false) => {},
                Err(e) => {
                    first_error.get_or_insert(e);
                },
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(disposed),
        }
    }

    fn ensure(
        &self,
        current: &mut Option<Arc<ExtensionInstance>>,
        feature: &str,
        app: &Arc<ApplicationContext>,
    ) -> InstanceResult<Arc<ExtensionInstance>> {
        if let Some(instance) = current.as_ref() {
            return Ok(Arc::clone(instance));
        }
        let instance = Arc::new(self.construct(feature, app)?);
        *current = Some(Arc::clone(&instance));
        Ok(instance)
    }

    fn construct(
        &self,
        feature: &str,
        app: &Arc<ApplicationContext>,
    ) -> InstanceResult<ExtensionInstance> {
        let factory = self
            .factories
            .get(feature)
            .ok_or_else(|| InstanceError::FeatureNotRegistered(feature.to_owned()))?;

        let fail = |source: FeatureError| InstanceError::Factory {
            feature: feature.to_owned(),
            app: app.app_id().clone(),
            source,
        };

        let built = catch_unwind(AssertUnwindSafe(|| -> Result<Arc<dyn Feature>, FeatureError> {
            let implementation = factory(app)?;
            implementation.initialize(app)?;
            implementation.configure(app.feature_params(feature))?;
            Ok(implementation)
        }));
        let implementation = match built {
            Ok(Ok(implementation)) => implementation,
            Ok(Err(e)) => return Err(fail(e)),
            Err(payload) => {
                return Err(fail(FeatureError::Unavailable(format!(
                    "construction panicked: {}",
                    panic_message(payload.as_ref())
                ))));
            },
        };

        let id = InstanceId::next();
        debug!(feature, app = %app.app_id(), instance = %id, "Instance created");
        Ok(ExtensionInstance {
            id,
            feature_name: feature.to_owned(),
            app: Arc::clone(app),
            feature: implementation,
            in_flight: Mutex::new(0),
            drained: Condvar::new(),
            disposed: AtomicBool::new(false),
        })
    }
}

impl fmt::Debug for ExtensionInstanceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionInstanceManager")
            .field("factories", &self.factories)
            .field("slots", &self.slots.len())
            .field("graceful_timeout", &self.graceful_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
