//! # Payload Processing Module
//!
//! Classifies Bitbucket push notifications, extracts the canonical
//! [`PushNotification`] and dispatches it to a [`JobTrigger`].
//!
//! Three payload dialects are understood:
//!
//! | Dialect                          | Detected by                                          |
//! |----------------------------------|------------------------------------------------------|
//! | [`Dialect::ServerPostWebhook`]   | body has `repository.slug`                           |
//! | [`Dialect::CloudWebhookV2`]      | `User-Agent: Bitbucket-Webhooks/2.0` + `X-Event-Key: repo:push` |
//! | [`Dialect::CloudLegacy`]         | anything else                                        |
//!
//! The checks run in that order and the first match wins. Bitbucket Server
//! does not send the Cloud headers, so it can only be recognised from the
//! body; the two Cloud dialects share no distinguishing body field, so they
//! are told apart by header.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, Dispatch, Span};

mod cloud_post_service;
mod cloud_webhook;
mod server_webhook;

// ============================================================================
// Core Types
// ============================================================================

/// The request headers consulted during classification.
///
/// Only `User-Agent` and `X-Event-Key` influence processing; every other
/// header is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    pub user_agent: Option<String>, // User-Agent
    pub event_key: Option<String>,  // X-Event-Key
}

impl RequestHeaders {
    /// `User-Agent` sent by Bitbucket Cloud webhooks.
    pub const CLOUD_WEBHOOK_USER_AGENT: &'static str = "Bitbucket-Webhooks/2.0";

    /// `X-Event-Key` of a Bitbucket Cloud repository push.
    pub const PUSH_EVENT_KEY: &'static str = "repo:push";

    /// Headers as sent by a Bitbucket Cloud webhook for a repository push.
    pub fn cloud_push() -> Self {
        Self {
            user_agent: Some(Self::CLOUD_WEBHOOK_USER_AGENT.to_string()),
            event_key: Some(Self::PUSH_EVENT_KEY.to_string()),
        }
    }

    /// Pick the relevant headers out of an HTTP header map.
    ///
    /// Header names are matched case-insensitively.
    pub fn from_http_headers(headers: &HashMap<String, String>) -> Self {
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        };

        Self {
            user_agent: lookup("user-agent"),
            event_key: lookup("x-event-key"),
        }
    }

    /// Whether these headers identify a Bitbucket Cloud `repo:push` webhook.
    pub fn is_cloud_push(&self) -> bool {
        self.user_agent.as_deref() == Some(Self::CLOUD_WEBHOOK_USER_AGENT)
            && self.event_key.as_deref() == Some(Self::PUSH_EVENT_KEY)
    }
}

/// Canonical notification handed to the job matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    /// Who pushed, in the producing dialect's vocabulary.
    pub actor: String,
    /// Repository URL used for job matching.
    pub repository_url: String,
    /// SCM type, e.g. `git` or `hg`.
    pub scm_type: String,
    /// The original payload serialized back to JSON text.
    pub raw_payload: String,
}

/// The known payload dialects, in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    /// Bitbucket Server post-webhook plugin.
    #[serde(rename = "bitbucket_server_post_webhook")]
    ServerPostWebhook,
    /// Bitbucket Cloud webhook (`repo:push`).
    #[serde(rename = "bitbucket_cloud_webhook")]
    CloudWebhookV2,
    /// Bitbucket Cloud legacy POST service.
    #[serde(rename = "bitbucket_cloud_post_service")]
    CloudLegacy,
}

impl Dialect {
    /// Classify a payload.
    ///
    /// The body shape is checked before the headers; see the module
    /// documentation for the ordering.
    pub fn classify(payload: &Value, headers: &RequestHeaders) -> Self {
        if field(payload, "repository.slug").is_some() {
            Self::ServerPostWebhook
        } else if headers.is_cloud_push() {
            Self::CloudWebhookV2
        } else {
            Self::CloudLegacy
        }
    }

    /// Stable identifier used in logs, `Display` and serialized output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerPostWebhook => "bitbucket_server_post_webhook",
            Self::CloudWebhookV2 => "bitbucket_cloud_webhook",
            Self::CloudLegacy => "bitbucket_cloud_post_service",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing a single payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// A notification was extracted and handed to the [`JobTrigger`].
    Dispatched(PushNotification),
    /// The payload was classified but carries no shape this crate acts on.
    Ignored {
        dialect: Dialect,
        reason: &'static str,
    },
}

/// Fields pulled out of a payload by a dialect extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExtractedFields {
    pub actor: String,
    pub repository_url: String,
    pub scm_type: String,
}

/// What a dialect extractor found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Extraction {
    Fields(ExtractedFields),
    Unrecognized { reason: &'static str },
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while extracting a notification from a payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid field type: {field}")]
    InvalidFieldType { field: String },

    #[error("Could not parse repository URL '{href}': {source}")]
    MalformedUrl {
        href: String,
        #[source]
        source: url::ParseError,
    },

    #[error("JSON parsing failed: {0}")]
    JsonParsing(#[from] serde_json::Error),
}

impl PayloadError {
    /// Payload errors never succeed on retry.
    pub fn is_transient(&self) -> bool {
        false
    }

    /// Get error category for monitoring
    pub fn error_category(&self) -> crate::ErrorCategory {
        crate::ErrorCategory::Permanent
    }

    /// Dotted path of the offending field, for field errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField { field } | Self::InvalidFieldType { field } => Some(field),
            Self::MalformedUrl { .. } | Self::JsonParsing(_) => None,
        }
    }

    /// Prefix the field path of a field error with the path of its parent.
    pub(crate) fn within(self, parent: &str) -> Self {
        match self {
            Self::MissingField { field } => Self::MissingField {
                field: format!("{parent}.{field}"),
            },
            Self::InvalidFieldType { field } => Self::InvalidFieldType {
                field: format!("{parent}.{field}"),
            },
            other => other,
        }
    }
}

// ============================================================================
// Core Operations (Traits)
// ============================================================================

/// Downstream collaborator that decides which jobs a notification triggers.
///
/// Called at most once per processed payload. Implementations must not
/// block the caller; anything slow belongs on their own executor.
pub trait JobTrigger: Send + Sync {
    fn trigger_matching_jobs(&self, notification: &PushNotification);
}

/// A [`JobTrigger`] that only logs what it receives.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingJobTrigger;

impl JobTrigger for LoggingJobTrigger {
    fn trigger_matching_jobs(&self, notification: &PushNotification) {
        info!(
            actor = %notification.actor,
            repository_url = %notification.repository_url,
            scm_type = %notification.scm_type,
            "Push notification received"
        );
    }
}

// ============================================================================
// PayloadProcessor
// ============================================================================

/// Classifies payloads and dispatches the extracted notification.
///
/// The processor holds no per-request state and can be shared between
/// request handlers behind an `Arc`.
///
/// # Logging
///
/// By default diagnostics go to whatever `tracing` subscriber is active for
/// the caller. [`PayloadProcessor::with_log_dispatch`] scopes them to a
/// specific dispatcher instead, and [`PayloadProcessor::silent`] discards
/// them entirely.
///
/// # Examples
///
/// ```rust
/// use bitbucket_trigger_core::payload::{PayloadProcessor, ProcessingOutcome, RequestHeaders};
/// use bitbucket_trigger_core::LoggingJobTrigger;
/// use std::sync::Arc;
///
/// let processor = PayloadProcessor::silent(Arc::new(LoggingJobTrigger));
/// let payload = serde_json::json!({
///     "actor": { "username": "test_user" },
///     "repository": {
///         "links": { "html": { "href": "https://bitbucket.org/test_user/test_repo" } }
///     }
/// });
///
/// let outcome = processor.process(&payload, &RequestHeaders::cloud_push()).unwrap();
/// match outcome {
///     ProcessingOutcome::Dispatched(notification) => assert_eq!(notification.scm_type, "git"),
///     other => panic!("unexpected outcome: {other:?}"),
/// }
/// ```
pub struct PayloadProcessor {
    trigger: Arc<dyn JobTrigger>,
    log_dispatch: Option<Dispatch>,
}

impl PayloadProcessor {
    /// Create a processor that logs through the caller's active subscriber.
    pub fn new(trigger: Arc<dyn JobTrigger>) -> Self {
        Self {
            trigger,
            log_dispatch: None,
        }
    }

    /// Create a processor whose diagnostics go to `dispatch`.
    pub fn with_log_dispatch(trigger: Arc<dyn JobTrigger>, dispatch: Dispatch) -> Self {
        Self {
            trigger,
            log_dispatch: Some(dispatch),
        }
    }

    /// Create a processor that emits no diagnostics at all.
    pub fn silent(trigger: Arc<dyn JobTrigger>) -> Self {
        Self::with_log_dispatch(trigger, Dispatch::none())
    }

    /// Process a parsed payload.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::MissingField`] or [`PayloadError::InvalidFieldType`]
    /// when a field required by the detected dialect is absent or has the wrong
    /// type, and [`PayloadError::MalformedUrl`] when a Bitbucket Server self link
    /// cannot be parsed. No notification is dispatched in either case.
    pub fn process(
        &self,
        payload: &Value,
        headers: &RequestHeaders,
    ) -> Result<ProcessingOutcome, PayloadError> {
        self.scoped(|| self.classify_and_dispatch(payload, headers))
    }

    /// Parse a raw JSON body and process it.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::JsonParsing`] when the body is not valid JSON,
    /// otherwise the same errors as [`PayloadProcessor::process`].
    pub fn process_body(
        &self,
        body: &[u8],
        headers: &RequestHeaders,
    ) -> Result<ProcessingOutcome, PayloadError> {
        let payload: Value = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => {
                self.scoped(|| {
                    error!(
                        error = %e,
                        size_bytes = body.len(),
                        "Webhook body is not valid JSON"
                    )
                });
                return Err(e.into());
            }
        };

        self.process(&payload, headers)
    }

    fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.log_dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }

    #[instrument(skip_all, fields(dialect = tracing::field::Empty))]
    fn classify_and_dispatch(
        &self,
        payload: &Value,
        headers: &RequestHeaders,
    ) -> Result<ProcessingOutcome, PayloadError> {
        let dialect = Dialect::classify(payload, headers);
        Span::current().record("dialect", dialect.as_str());

        info!(
            dialect = %dialect,
            user_agent = ?headers.user_agent,
            event_key = ?headers.event_key,
            "Processing Bitbucket payload"
        );

        // Defaults for absent fields are applied inside each extractor.
        let extraction = match dialect {
            Dialect::ServerPostWebhook => server_webhook::extract(payload),
            Dialect::CloudWebhookV2 => cloud_webhook::extract(payload),
            Dialect::CloudLegacy => cloud_post_service::extract(payload),
        };

        let fields = match extraction {
            Ok(Extraction::Fields(fields)) => fields,
            Ok(Extraction::Unrecognized { reason }) => {
                info!(dialect = %dialect, reason, "Ignoring payload with unrecognized shape");
                return Ok(ProcessingOutcome::Ignored { dialect, reason });
            }
            Err(e) => {
                error!(dialect = %dialect, error = %e, "Failed to extract push notification");
                return Err(e);
            }
        };

        let notification = PushNotification {
            actor: fields.actor,
            repository_url: fields.repository_url,
            scm_type: fields.scm_type,
            raw_payload: payload.to_string(),
        };

        debug!(
            actor = %notification.actor,
            repository_url = %notification.repository_url,
            scm_type = %notification.scm_type,
            "Dispatching push notification"
        );

        self.trigger.trigger_matching_jobs(&notification);

        Ok(ProcessingOutcome::Dispatched(notification))
    }
}

// ============================================================================
// Private helpers
// ============================================================================

/// Traverse a dot-separated path of object keys.
///
/// JSON `null` counts as absent.
pub(crate) fn field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, key| current.get(key))
        .filter(|v| !v.is_null())
}

/// Resolve a dot-separated path that must hold a string.
pub(crate) fn required_str<'a>(value: &'a Value, path: &str) -> Result<&'a str, PayloadError> {
    field(value, path)
        .ok_or_else(|| PayloadError::MissingField {
            field: path.to_string(),
        })?
        .as_str()
        .ok_or_else(|| PayloadError::InvalidFieldType {
            field: path.to_string(),
        })
}

/// Resolve an optional string field, falling back to `default` when absent.
pub(crate) fn str_or<'a>(
    value: &'a Value,
    path: &str,
    default: &'a str,
) -> Result<&'a str, PayloadError> {
    match field(value, path) {
        None => Ok(default),
        Some(v) => v.as_str().ok_or_else(|| PayloadError::InvalidFieldType {
            field: path.to_string(),
        }),
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
