//! Correlation context for one bridge invocation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one unit of work and ties together everything it causes.
///
/// A context made with [`RequestContext::child`] keeps the parent's
/// correlation id, so a permission prompt or a deferred delivery can be
/// traced back to the dispatch that started it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Unique per context.
    pub id: Uuid,
    /// Shared by a root context and all its children.
    pub correlation_id: Uuid,
    /// Id of the context this one was derived from.
    pub parent_id: Option<Uuid>,
    /// Component that opened the context (`"dispatch"`, `"prompt"`, ...).
    pub source: String,
    /// Owning application, when known.
    pub app: Option<String>,
    /// What is being done, typically `feature.action`.
    pub operation: Option<String>,
    /// When the context was opened.
    pub started_at: DateTime<Utc>,
    /// Free-form tags, inherited by children.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl RequestContext {
    /// Open a root context.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            correlation_id: id,
            parent_id: None,
            source: source.into(),
            app: None,
            operation: None,
            started_at: Utc::now(),
            tags: BTreeMap::new(),
        }
    }

    /// Derive a context for follow-up work.
    #[must_use]
    pub fn child(&self, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id: self.correlation_id,
            parent_id: Some(self.id),
            source: source.into(),
            app: self.app.clone(),
            operation: self.operation.clone(),
            started_at: Utc::now(),
            tags: self.tags.clone(),
        }
    }

    /// Attach the owning application.
    #[must_use]
    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    /// Name the operation.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Milliseconds since the context was opened.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    /// First eight hex digits of the id.
    #[must_use]
    pub fn short_id(&self) -> String {
        let mut id = self.id.simple().to_string();
        id.truncate(8);
        id
    }

    /// An `info` span carrying the correlation fields.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            id = %self.short_id(),
            correlation_id = %self.correlation_id,
            source = %self.source,
            app = self.app.as_deref(),
            operation = self.operation.as_deref(),
        )
    }
}

/// Enters a context's span for its lifetime and logs start and completion.
pub struct RequestGuard {
    context: RequestContext,
    _span: tracing::span::EnteredSpan,
}

impl RequestGuard {
    /// Enter the context's span.
    #[must_use]
    pub fn new(context: RequestContext) -> Self {
        let span = context.span().entered();
        tracing::trace!("request started");
        Self {
            context,
            _span: span,
        }
    }

    /// The guarded context.
    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        tracing::trace!(elapsed_ms = self.context.elapsed_ms(), "request completed");
    }
}
