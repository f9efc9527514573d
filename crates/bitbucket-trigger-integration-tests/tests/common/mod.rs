//! Common test utilities for bitbucket-trigger integration tests
//!
//! This module provides:
//! - A recording [`JobTrigger`] implementation
//! - Fixture loading
//! - Log capture for processors with an injected dispatcher

use bitbucket_trigger_core::payload::{JobTrigger, PayloadProcessor, PushNotification};
use serde_json::Value;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::Dispatch;

// ============================================================================
// Recording Job Trigger
// ============================================================================

/// Job trigger that records every notification it is handed
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct RecordingJobTrigger {
    calls: Arc<Mutex<Vec<PushNotification>>>,
}

impl RecordingJobTrigger {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn get_calls(&self) -> Vec<PushNotification> {
        self.calls.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The only recorded notification; panics unless exactly one was recorded.
    #[allow(dead_code)]
    pub fn single_call(&self) -> PushNotification {
        let calls = self.get_calls();
        assert_eq!(
            calls.len(),
            1,
            "expected exactly one dispatch, got {calls:?}"
        );
        calls.into_iter().next().unwrap()
    }
}

impl JobTrigger for RecordingJobTrigger {
    fn trigger_matching_jobs(&self, notification: &PushNotification) {
        self.calls.lock().unwrap().push(notification.clone());
    }
}

/// Silent processor wired to a fresh recording trigger
#[allow(dead_code)]
pub fn create_test_processor() -> (PayloadProcessor, RecordingJobTrigger) {
    let trigger = RecordingJobTrigger::new();
    let processor = PayloadProcessor::silent(Arc::new(trigger.clone()));
    (processor, trigger)
}

// ============================================================================
// Fixtures
// ============================================================================

#[allow(dead_code)]
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

#[allow(dead_code)]
pub fn load_fixture_bytes(name: &str) -> Vec<u8> {
    let path = fixture_path(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()))
}

#[allow(dead_code)]
pub fn load_fixture(name: &str) -> Value {
    serde_json::from_slice(&load_fixture_bytes(name))
        .unwrap_or_else(|e| panic!("fixture {name} is not valid JSON: {e}"))
}

// ============================================================================
// Log Capture
// ============================================================================

/// In-memory log sink shared with a `tracing` subscriber
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    #[allow(dead_code)]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Dispatcher writing plain-text events of every level into this sink
    #[allow(dead_code)]
    pub fn dispatch(&self) -> Dispatch {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        Dispatch::new(subscriber)
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
