//! The action registry.
//!
//! Features are staged in a [`RegistryBuilder`], validated as they arrive,
//! and frozen into an [`ActionRegistry`] that is never mutated again. Lookups
//! take `&self` and need no locking.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, info};
use trellis_core::{
    Access, ActionDescriptor, ActionType, FeatureDescriptor, Multiplicity, Normalize,
};

use crate::error::{RegistryError, RegistryResult};

/// Collects feature declarations before the registry is frozen.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    features: BTreeMap<String, FeatureDescriptor>,
}

impl RegistryBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and stage a feature.
    ///
    /// Registering a declaration identical to one already staged is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDescriptor`] if the declaration breaks
    /// a coherence rule, or [`RegistryError::ConflictingFeature`] if the name
    /// is taken by a different declaration.
    pub fn register(&mut self, feature: FeatureDescriptor) -> RegistryResult<&mut Self> {
        let feature = feature.bound();
        feature.validate()?;

        if let Some(existing) = self.features.get(feature.name()) {
            if existing.same_as(&feature) {
                debug!(feature = %feature.name(), "Identical feature registered twice, ignoring");
                return Ok(self);
            }
            return Err(RegistryError::ConflictingFeature {
                feature: feature.name().to_owned(),
            });
        }

        debug!(
            feature = %feature.name(),
            actions = feature.actions().len(),
            "Registered feature"
        );
        self.features.insert(feature.name().to_owned(), feature);
        Ok(self)
    }

    /// Stage several features, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// See [`RegistryBuilder::register`].
    pub fn register_all(
        &mut self,
        features: impl IntoIterator<Item = FeatureDescriptor>,
    ) -> RegistryResult<&mut Self> {
        for feature in features {
            self.register(feature)?;
        }
        Ok(self)
    }

    /// Names of the staged features.
    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> Arc<ActionRegistry> {
        let features: BTreeMap<String, RegisteredFeature> = self
            .features
            .into_iter()
            .map(|(name, descriptor)| (name, RegisteredFeature::index(descriptor)))
            .collect();
        info!(features = features.len(), "Action registry built");
        Arc::new(ActionRegistry { features })
    }
}

#[derive(Debug)]
struct RegisteredFeature {
    descriptor: FeatureDescriptor,
    /// Keyed by both name and alias.
    by_name: HashMap<String, Arc<ActionDescriptor>>,
}

impl RegisteredFeature {
    fn index(descriptor: FeatureDescriptor) -> Self {
        let mut by_name = HashMap::with_capacity(descriptor.actions().len());
        for action in descriptor.actions() {
            let shared = Arc::new(action.clone());
            if let Some(alias) = action.alias() {
                by_name.insert(alias.to_owned(), Arc::clone(&shared));
            }
            by_name.insert(action.name().to_owned(), shared);
        }
        Self {
            descriptor,
            by_name,
        }
    }
}

/// Immutable mapping of (feature, action) to its descriptor.
#[derive(Debug)]
pub struct ActionRegistry {
    features: BTreeMap<String, RegisteredFeature>,
}

impl ActionRegistry {
    /// Start a new registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Resolve an action by name or alias.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if either the feature or the
    /// action is unknown.
    pub fn lookup(&self, feature: &str, action: &str) -> RegistryResult<Arc<ActionDescriptor>> {
        self.features
            .get(feature)
            .and_then(|f| f.by_name.get(action))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                feature: feature.to_owned(),
                action: action.to_owned(),
            })
    }

    /// A registered feature's declaration.
    #[must_use]
    pub fn feature(&self, name: &str) -> Option<&FeatureDescriptor> {
        self.features.get(name).map(|f| &f.descriptor)
    }

    /// Whether the feature is registered.
    #[must_use]
    pub fn contains_feature(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    /// Every registered feature, ordered by name.
    pub fn features(&self) -> impl Iterator<Item = &FeatureDescriptor> {
        self.features.values().map(|f| &f.descriptor)
    }

    /// Number of registered features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// The metadata the script side builds its proxies from.
    ///
    /// Only features accepted by `include` are listed. Fields holding their
    /// default value are omitted.
    #[must_use]
    pub fn feature_map_json(&self, include: impl Fn(&str) -> bool) -> Value {
        Value::Array(
            self.features()
                .filter(|f| include(f.name()))
                .map(feature_json)
                .collect(),
        )
    }
}

fn feature_json(feature: &FeatureDescriptor) -> Value {
    let methods: Vec<Value> = feature.actions().iter().map(method_json).collect();
    json!({
        "name": feature.name(),
        "methods": methods,
        "instantiable": feature.is_instantiable(),
    })
}

fn method_json(action: &ActionDescriptor) -> Value {
    let mut method = Map::new();
    method.insert("name".into(), json!(action.name()));
    method.insert("mode".into(), json!(action.mode().ordinal()));
    if action.action_type() != ActionType::default() {
        method.insert("type".into(), json!(action.action_type().ordinal()));
    }
    if action.access() != Access::default() {
        method.insert("access".into(), json!(action.access().ordinal()));
    }
    if action.normalize() != Normalize::default() {
        method.insert("normalize".into(), json!(action.normalize().ordinal()));
    }
    if action.multiplicity() != Multiplicity::default() {
        method.insert("multiple".into(), json!(action.multiplicity().ordinal()));
    }
    if let Some(alias) = action.alias() {
        method.insert("alias".into(), json!(alias));
    }
    if !action.sub_attributes().is_empty() {
        method.insert("subAttrs".into(), json!(action.sub_attributes()));
    }
    Value::Object(method)
}
