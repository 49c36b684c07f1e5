//! Feature and action descriptors.
//!
//! Descriptors are pure data: they state how an action is invoked, what it
//! exposes and which permissions it needs. They are built in code with
//! [`ActionDescriptor::builder`] or deserialized from a manifest, and are
//! validated once when the registry is built.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Name of the constructor action. Declaring it makes a feature instantiable.
pub const ACTION_INIT: &str = "__init__";

/// How an action is invoked and how its result reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Runs on the calling thread; its result is the returned response.
    Sync,
    /// Acknowledged immediately; one result arrives through the callback.
    Async,
    /// Registers a subscription; native events deliver zero or more results.
    Callback,
    /// Returns synchronously and may also deliver through the callback.
    SyncCallback,
}

/// What kind of member an action exposes to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// A callable function.
    #[default]
    Function,
    /// A readable or writable property.
    Attribute,
    /// An event subscription.
    Event,
}

/// Attribute access direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Not an attribute accessor.
    #[default]
    None,
    /// Attribute getter.
    Read,
    /// Attribute setter.
    Write,
}

/// How raw parameters are turned into [`Params`](crate::request::Params).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalize {
    /// Pass the payload through untouched.
    Raw,
    /// Parse the payload as JSON.
    #[default]
    Json,
}

/// Whether an action takes one value or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    /// One value.
    #[default]
    Single,
    /// Many values.
    Multi,
}

/// Whether an action stays usable while the application is in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidentType {
    /// Refused while backgrounded.
    #[default]
    None,
    /// Allowed while backgrounded.
    Useable,
}

/// When the permission gate asks the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStrategy {
    /// Ask once and reuse the remembered decision.
    #[default]
    FirstTime,
    /// Ask on every invocation, ignoring cached decisions.
    EveryTime,
}

macro_rules! ordinal {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $ty {
                /// Declaration-order index used in the published feature map.
                #[must_use]
                pub const fn ordinal(self) -> u8 {
                    self as u8
                }
            }
        )+
    };
}

ordinal!(Mode, ActionType, Access, Normalize, Multiplicity);

/// Immutable description of one action of a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    #[serde(skip)]
    feature: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    mode: Mode,
    #[serde(default, rename = "type")]
    action_type: ActionType,
    #[serde(default)]
    access: Access,
    #[serde(default)]
    normalize: Normalize,
    #[serde(default, rename = "multiple")]
    multiplicity: Multiplicity,
    #[serde(default)]
    resident: ResidentType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    permissions: Vec<String>,
    #[serde(default, rename = "sub_attrs", skip_serializing_if = "Vec::is_empty")]
    sub_attributes: Vec<String>,
    #[serde(default)]
    prompt_strategy: PromptStrategy,
}

impl ActionDescriptor {
    /// Start building a descriptor with defaults for everything but the
    /// name and mode.
    #[must_use]
    pub fn builder(name: impl Into<String>, mode: Mode) -> ActionDescriptorBuilder {
        ActionDescriptorBuilder {
            descriptor: Self {
                feature: String::new(),
                name: name.into(),
                alias: None,
                mode,
                action_type: ActionType::default(),
                access: Access::default(),
                normalize: Normalize::default(),
                multiplicity: Multiplicity::default(),
                resident: ResidentType::default(),
                permissions: Vec::new(),
                sub_attributes: Vec::new(),
                prompt_strategy: PromptStrategy::default(),
            },
        }
    }

    /// Owning feature name. Empty until attached to a [`FeatureDescriptor`].
    #[must_use]
    pub fn feature(&self) -> &str {
        &self.feature
    }

    /// Action name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Alternative name the action also answers to.
    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Invocation mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Member kind.
    #[must_use]
    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    /// Attribute access.
    #[must_use]
    pub fn access(&self) -> Access {
        self.access
    }

    /// Parameter normalization.
    #[must_use]
    pub fn normalize(&self) -> Normalize {
        self.normalize
    }

    /// Value multiplicity.
    #[must_use]
    pub fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    /// Background availability.
    #[must_use]
    pub fn resident(&self) -> ResidentType {
        self.resident
    }

    /// Required permissions, in declaration order.
    #[must_use]
    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    /// Sub-attribute names (attribute actions only).
    #[must_use]
    pub fn sub_attributes(&self) -> &[String] {
        &self.sub_attributes
    }

    /// Prompt strategy.
    #[must_use]
    pub fn prompt_strategy(&self) -> PromptStrategy {
        self.prompt_strategy
    }

    /// Whether `name` is this action's name or alias.
    #[must_use]
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.alias.as_deref() == Some(name)
    }

    /// Check that the type, mode and access combination is coherent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDescriptor`] naming the violated rule.
    pub fn validate(&self) -> CoreResult<()> {
        let fail = |reason: &str| {
            Err(CoreError::InvalidDescriptor {
                feature: self.feature.clone(),
                action: self.name.clone(),
                reason: reason.to_string(),
            })
        };

        if self.name.is_empty() {
            return fail("action name cannot be empty");
        }
        if self.alias.as_deref().is_some_and(str::is_empty) {
            return fail("alias cannot be empty");
        }
        if self.permissions.iter().any(String::is_empty) {
            return fail("permission names cannot be empty");
        }

        match self.action_type {
            ActionType::Function => {
                if self.access != Access::None {
                    return fail("function actions must have access NONE");
                }
            },
            ActionType::Event => {
                if self.mode != Mode::Callback {
                    return fail("event actions must use mode CALLBACK");
                }
                if self.access != Access::None {
                    return fail("event actions must have access NONE");
                }
            },
            ActionType::Attribute => {
                if self.mode != Mode::Sync {
                    return fail("attribute actions must use mode SYNC");
                }
                if self.access == Access::None {
                    return fail("attribute actions must declare READ or WRITE access");
                }
                if self.alias.is_none() {
                    return fail("attribute actions must declare an alias");
                }
                if !self.permissions.is_empty() {
                    return fail("attribute actions cannot require permissions");
                }
            },
        }

        if !self.sub_attributes.is_empty() && self.action_type != ActionType::Attribute {
            return fail("sub-attributes are only allowed on attribute actions");
        }

        if self.name == ACTION_INIT
            && (self.mode != Mode::Sync || self.action_type != ActionType::Function)
        {
            return fail("the constructor action must be a SYNC function");
        }

        Ok(())
    }
}

/// Builder for [`ActionDescriptor`].
#[derive(Debug, Clone)]
#[must_use]
pub struct ActionDescriptorBuilder {
    descriptor: ActionDescriptor,
}

impl ActionDescriptorBuilder {
    /// Set the alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.descriptor.alias = Some(alias.into());
        self
    }

    /// Set the member kind.
    pub fn action_type(mut self, action_type: ActionType) -> Self {
        self.descriptor.action_type = action_type;
        self
    }

    /// Set attribute access.
    pub fn access(mut self, access: Access) -> Self {
        self.descriptor.access = access;
        self
    }

    /// Set parameter normalization.
    pub fn normalize(mut self, normalize: Normalize) -> Self {
        self.descriptor.normalize = normalize;
        self
    }

    /// Set multiplicity.
    pub fn multiplicity(mut self, multiplicity: Multiplicity) -> Self {
        self.descriptor.multiplicity = multiplicity;
        self
    }

    /// Set background availability.
    pub fn resident(mut self, resident: ResidentType) -> Self {
        self.descriptor.resident = resident;
        self
    }

    /// Require a permission. Order is preserved.
    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.descriptor.permissions.push(permission.into());
        self
    }

    /// Add a sub-attribute name.
    pub fn sub_attribute(mut self, name: impl Into<String>) -> Self {
        self.descriptor.sub_attributes.push(name.into());
        self
    }

    /// Set the prompt strategy.
    pub fn prompt_strategy(mut self, strategy: PromptStrategy) -> Self {
        self.descriptor.prompt_strategy = strategy;
        self
    }

    /// Finish building. Validation happens at registration.
    #[must_use]
    pub fn build(self) -> ActionDescriptor {
        self.descriptor
    }
}

/// A feature and the actions it exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    name: String,
    #[serde(default)]
    actions: Vec<ActionDescriptor>,
}

impl FeatureDescriptor {
    /// A feature with no actions yet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    /// Add an action, binding it to this feature.
    #[must_use]
    pub fn with_action(mut self, mut action: ActionDescriptor) -> Self {
        action.feature.clone_from(&self.name);
        self.actions.push(action);
        self
    }

    /// Feature name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared actions.
    #[must_use]
    pub fn actions(&self) -> &[ActionDescriptor] {
        &self.actions
    }

    /// Find an action by name or alias.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionDescriptor> {
        self.actions.iter().find(|a| a.answers_to(name))
    }

    /// Whether the feature declares a constructor action.
    #[must_use]
    pub fn is_instantiable(&self) -> bool {
        self.actions.iter().any(|a| a.name == ACTION_INIT)
    }

    /// Bind every action to this feature's name.
    ///
    /// Deserialized descriptors arrive with an empty feature field.
    #[must_use]
    pub fn bound(mut self) -> Self {
        for action in &mut self.actions {
            action.feature.clone_from(&self.name);
        }
        self
    }

    /// Actions ordered by name, for declaration-order-insensitive comparison.
    #[must_use]
    pub fn normalized(&self) -> Vec<&ActionDescriptor> {
        let mut actions: Vec<_> = self.actions.iter().collect();
        actions.sort_by(|a, b| a.name.cmp(&b.name));
        actions
    }

    /// Whether two declarations describe the same feature.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.name == other.name && self.normalized() == other.normalized()
    }

    /// Validate every action and the uniqueness of names and aliases.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDescriptor`] for the first problem found.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::InvalidDescriptor {
                feature: String::new(),
                action: String::new(),
                reason: "feature name cannot be empty".into(),
            });
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for action in &self.actions {
            action.validate()?;
            for key in std::iter::once(action.name.as_str()).chain(action.alias.as_deref()) {
                if !seen.insert(key) {
                    return Err(CoreError::InvalidDescriptor {
                        feature: self.name.clone(),
                        action: action.name.clone(),
                        reason: format!("name or alias '{key}' is declared twice"),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod tests;
