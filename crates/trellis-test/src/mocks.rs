//! Mock script contexts and permission hosts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use trellis_bridge::ScriptContext;
use trellis_core::{AppId, CallbackHandle, Response};
use trellis_permissions::{HostDecision, PermissionHost, UserDecision};

/// One delivery seen by a [`RecordingScriptContext`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDelivery {
    /// Callback token the delivery was addressed to.
    pub token: String,
    /// The delivered response.
    pub response: Response,
    /// When the delivery arrived.
    pub at: Instant,
}

impl RecordedDelivery {
    /// The JSON payload, if any.
    #[must_use]
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.response.payload().and_then(|p| p.as_json())
    }
}

/// Script context that records every delivery.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingScriptContext {
    deliveries: Arc<Mutex<Vec<RecordedDelivery>>>,
}

impl RecordingScriptContext {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far, in arrival order.
    #[must_use]
    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Deliveries addressed to `token`.
    #[must_use]
    pub fn deliveries_for(&self, token: &str) -> Vec<RecordedDelivery> {
        self.deliveries()
            .into_iter()
            .filter(|d| d.token == token)
            .collect()
    }

    /// Number of deliveries so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.deliveries.lock().map(|d| d.len()).unwrap_or_default()
    }

    /// Block until at least `n` deliveries arrived or `timeout` passed.
    ///
    /// Returns whatever was delivered by then.
    #[must_use]
    pub fn wait_for(&self, n: usize, timeout: Duration) -> Vec<RecordedDelivery> {
        let deadline = Instant::now().checked_add(timeout);
        while self.count() < n && deadline.is_some_and(|d| Instant::now() < d) {
            std::thread::sleep(Duration::from_millis(2));
        }
        self.deliveries()
    }

    /// Forget all recorded deliveries.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.deliveries.lock() {
            guard.clear();
        }
    }
}

impl ScriptContext for RecordingScriptContext {
    fn deliver(&self, handle: &CallbackHandle, response: Response) {
        if let Ok(mut guard) = self.deliveries.lock() {
            guard.push(RecordedDelivery {
                token: handle.token().to_owned(),
                response,
                at: Instant::now(),
            });
        }
    }
}

/// Permission host with scripted answers.
///
/// Permissions without an explicit state are reported as the default state
/// (undetermined unless changed). Prompts take queued answers first and fall
/// back to the default answer.
#[derive(Debug, Clone)]
pub struct MockPermissionHost {
    states: Arc<Mutex<HashMap<String, HostDecision>>>,
    default_state: HostDecision,
    answers: Arc<Mutex<VecDeque<Option<UserDecision>>>>,
    default_answer: Option<UserDecision>,
    prompt_delay: Duration,
    prompted: Arc<Mutex<Vec<(AppId, String)>>>,
}

impl Default for MockPermissionHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPermissionHost {
    /// A host that reports everything undetermined and dismisses prompts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            default_state: HostDecision::Undetermined,
            answers: Arc::new(Mutex::new(VecDeque::new())),
            default_answer: None,
            prompt_delay: Duration::ZERO,
            prompted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A host that grants everything without prompting.
    #[must_use]
    pub fn granting() -> Self {
        Self::new().with_default_state(HostDecision::Granted)
    }

    /// Report `decision` for `permission`.
    #[must_use]
    pub fn with_state(self, permission: impl Into<String>, decision: HostDecision) -> Self {
        self.set_state(permission, decision);
        self
    }

    /// State for permissions not set explicitly.
    #[must_use]
    pub fn with_default_state(mut self, decision: HostDecision) -> Self {
        self.default_state = decision;
        self
    }

    /// Queue an answer for the next prompt. `None` dismisses the dialog.
    #[must_use]
    pub fn with_answer(self, answer: Option<UserDecision>) -> Self {
        self.queue_answer(answer);
        self
    }

    /// Answer used when the queue is empty.
    #[must_use]
    pub fn with_default_answer(mut self, answer: Option<UserDecision>) -> Self {
        self.default_answer = answer;
        self
    }

    /// Wait this long before answering a prompt.
    #[must_use]
    pub fn with_prompt_delay(mut self, delay: Duration) -> Self {
        self.prompt_delay = delay;
        self
    }

    /// Change the reported state of one permission.
    pub fn set_state(&self, permission: impl Into<String>, decision: HostDecision) {
        if let Ok(mut guard) = self.states.lock() {
            guard.insert(permission.into(), decision);
        }
    }

    /// Queue an answer for the next prompt.
    pub fn queue_answer(&self, answer: Option<UserDecision>) {
        if let Ok(mut guard) = self.answers.lock() {
            guard.push_back(answer);
        }
    }

    /// Prompts shown so far.
    #[must_use]
    pub fn prompted(&self) -> Vec<(AppId, String)> {
        self.prompted.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Number of prompts shown so far.
    #[must_use]
    pub fn prompt_count(&self) -> usize {
        self.prompted.lock().map(|p| p.len()).unwrap_or_default()
    }
}

#[async_trait]
impl PermissionHost for MockPermissionHost {
    fn check_permissions(&self, _app: &AppId, permissions: &[String]) -> Vec<HostDecision> {
        let Ok(states) = self.states.lock() else {
            return vec![self.default_state; permissions.len()];
        };
        permissions
            .iter()
            .map(|p| states.get(p).copied().unwrap_or(self.default_state))
            .collect()
    }

    async fn prompt_user(&self, app: &AppId, permission: &str) -> Option<UserDecision> {
        if let Ok(mut guard) = self.prompted.lock() {
            guard.push((app.clone(), permission.to_owned()));
        }
        if !self.prompt_delay.is_zero() {
            tokio::time::sleep(self.prompt_delay).await;
        }
        let queued = self.answers.lock().ok().and_then(|mut q| q.pop_front());
        tracing::debug!(app = %app, permission, "mock prompt answered");
        queued.unwrap_or(self.default_answer)
    }
}
