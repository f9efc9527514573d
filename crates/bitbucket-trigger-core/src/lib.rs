//! # Bitbucket Trigger Core
//!
//! Core logic for turning Bitbucket push notifications into build triggers.
//!
//! Bitbucket delivers push notifications in three incompatible shapes:
//!
//! - Bitbucket Cloud webhooks (`User-Agent: Bitbucket-Webhooks/2.0`)
//! - the legacy Bitbucket Cloud POST service
//! - the Bitbucket Server post-webhook plugin
//!
//! The [`payload`] module classifies an incoming body into one of these
//! dialects, extracts the canonical [`PushNotification`] and hands it to a
//! [`JobTrigger`]. The [`repository_url`] module provides the loose URL
//! comparison a job matcher uses to decide whether a notification concerns
//! one of its configured repositories.
//!
//! ## Architecture
//!
//! - Processing is synchronous and stateless; nothing here performs I/O
//! - The downstream job matcher is abstracted behind the [`JobTrigger`] trait
//! - Diagnostics go through `tracing`, optionally scoped to an injected dispatcher
//!
//! ## Usage
//!
//! ```rust
//! use bitbucket_trigger_core::{
//!     payload::{PayloadProcessor, ProcessingOutcome, RequestHeaders},
//!     LoggingJobTrigger,
//! };
//! use std::sync::Arc;
//!
//! let processor = PayloadProcessor::new(Arc::new(LoggingJobTrigger));
//! let payload = serde_json::json!({
//!     "canon_url": "https://bitbucket.org",
//!     "user": "marcus",
//!     "repository": { "absolute_url": "/marcus/project-x/", "scm": "git" }
//! });
//!
//! let outcome = processor.process(&payload, &RequestHeaders::default()).unwrap();
//! assert!(matches!(outcome, ProcessingOutcome::Dispatched(_)));
//! ```

use serde::{Deserialize, Serialize};

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for alerting and exit-code decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures (e.g. I/O in a host process) that may succeed later
    Transient,
    /// Permanent failures; the same input will always fail the same way
    Permanent,
    /// Configuration errors preventing startup
    Configuration,
}

// ============================================================================
// Module declarations
// ============================================================================

/// Payload classification and extraction for Bitbucket push notifications
pub mod payload;

/// Loose repository URL comparison
pub mod repository_url;

// Re-export key types for convenience
pub use payload::{
    Dialect, JobTrigger, LoggingJobTrigger, PayloadError, PayloadProcessor, ProcessingOutcome,
    PushNotification, RequestHeaders,
};
pub use repository_url::{loosely_matches, RepositoryReference, RepositoryUrlError};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
