//! Recording session: the append-only timeline of one execution
//!
//! A [`RecordingSession`] may be shared (behind an `Arc`) by any number of
//! worker threads. Each `log_step` call redacts its payload, stores its
//! attachments, then appends under a single lock so that sequence numbers
//! are unique, gapless and equal to append order.
//!
//! Lifecycle: `open` -> `closing` -> `closed`. [`RecordingSession::close`]
//! finalizes exactly once; later calls return the same finalized view.

mod environment;
mod metadata;
mod step;

pub use environment::{EnvCapture, EnvironmentSnapshot, DEFAULT_ENV_ALLOWLIST, ENVIRONMENT_EVENT};
pub use metadata::{parse_metric, MetricValue, SessionMetadata};
pub use step::{Attachment, Step, StepKind};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, TryLockError};

use chrono::{DateTime, Utc};
use epi_canonical::{CanonicalError, CanonicalValue};
use epi_redact::{RedactionRecord, Redactor};
use serde_json::Value;
use thiserror::Error;

use crate::artifact::{ArtifactDigest, ArtifactStore, StoreError};

/// Audit reason recorded when a textual attachment is not valid UTF-8.
pub const INVALID_UTF8_REASON: &str = "invalid_utf8";

/// Errors from session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is closed; step rejected")]
    SessionClosed,

    #[error(transparent)]
    NonCanonicalValue(#[from] CanonicalError),

    #[error("artifact store error: {0}")]
    Store(#[from] StoreError),
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

#[derive(Debug)]
struct Timeline {
    state: SessionState,
    steps: Vec<Step>,
    artifact_refs: BTreeSet<ArtifactDigest>,
}

/// The finalized view of a session, handed to the package assembler.
#[derive(Debug)]
pub struct ClosedSession {
    pub session_id: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    /// Metadata after redaction
    pub metadata: SessionMetadata,
    pub metadata_redactions: Vec<RedactionRecord>,
    /// Steps in sequence order
    pub steps: Vec<Step>,
    /// Every digest referenced by any step
    pub artifact_digests: BTreeSet<ArtifactDigest>,
    assembly: Mutex<()>,
}

impl ClosedSession {
    /// Exclusive right to assemble this session; `None` if an assembly
    /// is already running.
    pub(crate) fn try_begin_assembly(&self) -> Option<MutexGuard<'_, ()>> {
        match self.assembly.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

/// Shared handle to an open session
pub type SessionHandle = Arc<RecordingSession>;

/// An in-progress recording
#[derive(Debug)]
pub struct RecordingSession {
    id: String,
    opened_at: DateTime<Utc>,
    store: Arc<ArtifactStore>,
    redactor: Arc<Redactor>,
    metadata: RwLock<SessionMetadata>,
    timeline: Mutex<Timeline>,
    step_count: AtomicU64,
    finalized: OnceLock<Arc<ClosedSession>>,
}

impl RecordingSession {
    /// Open a new session writing attachments to `store`.
    pub fn open(metadata: SessionMetadata, store: Arc<ArtifactStore>, redactor: Arc<Redactor>) -> Self {
        let id = ulid::Ulid::new().to_string().to_lowercase();
        tracing::info!(session_id = %id, workflow = %metadata.workflow_name, "session opened");

        Self {
            id,
            opened_at: Utc::now(),
            store,
            redactor,
            metadata: RwLock::new(metadata),
            timeline: Mutex::new(Timeline {
                state: SessionState::Open,
                steps: Vec::new(),
                artifact_refs: BTreeSet::new(),
            }),
            step_count: AtomicU64::new(0),
            finalized: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        self.lock_timeline().state
    }

    /// Steps appended so far. Does not block writers.
    pub fn step_count(&self) -> u64 {
        self.step_count.load(Ordering::Acquire)
    }

    /// Snapshot of the current metadata.
    pub fn metadata(&self) -> SessionMetadata {
        self.metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Amend metadata while the session is open.
    pub fn update_metadata<F>(&self, update: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut SessionMetadata),
    {
        let timeline = self.lock_timeline();
        if timeline.state != SessionState::Open {
            return Err(SessionError::SessionClosed);
        }
        let mut metadata = self.metadata.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metadata);
        Ok(())
    }

    pub fn set_goal(&self, goal: impl Into<String>) -> Result<(), SessionError> {
        let goal = goal.into();
        self.update_metadata(|m| m.goal = Some(goal))
    }

    pub fn set_notes(&self, notes: impl Into<String>) -> Result<(), SessionError> {
        let notes = notes.into();
        self.update_metadata(|m| m.notes = Some(notes))
    }

    pub fn add_tag(&self, tag: impl Into<String>) -> Result<(), SessionError> {
        let tag = tag.into();
        self.update_metadata(|m| {
            m.tags.insert(tag);
        })
    }

    pub fn record_metric(&self, key: impl Into<String>, value: impl Into<MetricValue>) -> Result<(), SessionError> {
        let (key, value) = (key.into(), value.into());
        self.update_metadata(|m| {
            m.metrics.insert(key, value);
        })
    }

    /// Mark the workflow as approved, optionally naming the approver.
    pub fn approve(&self, approved_by: Option<String>) -> Result<(), SessionError> {
        self.update_metadata(|m| {
            m.approved = true;
            m.approved_by = approved_by;
        })
    }

    /// Record one event, returning its sequence number.
    ///
    /// The payload is redacted and must be canonical: no floats, and no
    /// integers a JSON reader would round. Attached
    /// content is stored in the artifact store and referenced by digest;
    /// textual attachments are redacted first. A store failure fails only
    /// this call.
    pub fn log_step(
        &self,
        kind: StepKind,
        payload: Value,
        attachments: Vec<Attachment>,
    ) -> Result<u64, SessionError> {
        if self.state() != SessionState::Open {
            return Err(SessionError::SessionClosed);
        }

        let redacted = self.redactor.redact(&payload);
        CanonicalValue::from_json_interop(&redacted.value)?;
        let mut redactions = redacted.records;

        let mut artifacts = Vec::with_capacity(attachments.len());
        for (i, attachment) in attachments.into_iter().enumerate() {
            let content = if attachment.is_textual() {
                let path = format!("/attachments/{}", i);
                let out = match String::from_utf8(attachment.content) {
                    Ok(text) => self.redactor.redact_text(&text, &path),
                    // Text that cannot be decoded cannot be scanned.
                    Err(_) => self.redactor.mask(INVALID_UTF8_REASON, &path),
                };
                redactions.extend(out.records);
                out.value.into_bytes()
            } else {
                attachment.content
            };
            let digest = self.store.put_named(
                &content,
                &attachment.media_type,
                attachment.name.as_deref(),
            )?;
            artifacts.push(digest);
        }

        let mut timeline = self.lock_timeline();
        if timeline.state != SessionState::Open {
            return Err(SessionError::SessionClosed);
        }

        let seq = timeline.steps.len() as u64 + 1;
        let redaction_count = redactions.len();
        timeline.artifact_refs.extend(artifacts.iter().cloned());
        timeline.steps.push(Step {
            seq,
            timestamp: Utc::now(),
            kind,
            payload: redacted.value,
            artifacts,
            redactions,
        });
        self.step_count.store(seq, Ordering::Release);
        drop(timeline);

        tracing::debug!(
            session_id = %self.id,
            seq,
            kind = %kind,
            redactions = redaction_count,
            "step appended"
        );
        Ok(seq)
    }

    /// Record an environment snapshot as a `custom-event` step.
    pub fn log_environment(&self, capture: &EnvCapture) -> Result<u64, SessionError> {
        let snapshot = EnvironmentSnapshot::capture(capture);
        self.log_step(StepKind::CustomEvent, snapshot.to_payload(), Vec::new())
    }

    /// Finalize the session. Idempotent.
    pub fn close(&self) -> Arc<ClosedSession> {
        Arc::clone(self.finalized.get_or_init(|| self.finalize()))
    }

    /// True once `close` has completed.
    pub fn is_closed(&self) -> bool {
        self.finalized.get().is_some()
    }

    fn finalize(&self) -> Arc<ClosedSession> {
        let (steps, artifact_digests, metadata) = {
            let mut timeline = self.lock_timeline();
            timeline.state = SessionState::Closing;
            let metadata = self
                .metadata
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            (
                std::mem::take(&mut timeline.steps),
                std::mem::take(&mut timeline.artifact_refs),
                metadata,
            )
        };

        let (metadata, metadata_redactions) = metadata.redacted(&self.redactor);
        let closed = Arc::new(ClosedSession {
            session_id: self.id.clone(),
            opened_at: self.opened_at,
            closed_at: Utc::now(),
            metadata,
            metadata_redactions,
            steps,
            artifact_digests,
            assembly: Mutex::new(()),
        });

        self.lock_timeline().state = SessionState::Closed;
        tracing::info!(
            session_id = %self.id,
            steps = closed.steps.len(),
            artifacts = closed.artifact_digests.len(),
            "session closed"
        );
        closed
    }

    fn lock_timeline(&self) -> MutexGuard<'_, Timeline> {
        self.timeline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
