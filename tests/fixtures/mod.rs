//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use epi_evidence::session::RecordingSession;
use epi_evidence::{ArtifactStore, Attachment, EvidencePackage, Redactor, SessionMetadata, StepKind};
use serde_json::json;

/// Fresh Ed25519 key
pub fn generate_key() -> SigningKey {
    SigningKey::generate(&mut rand::thread_rng())
}

/// Session backed by an in-memory store and the built-in rules
pub fn open_session(workflow: &str) -> (Arc<RecordingSession>, Arc<ArtifactStore>) {
    let store = Arc::new(ArtifactStore::in_memory());
    let session = Arc::new(RecordingSession::open(
        SessionMetadata::new(workflow),
        Arc::clone(&store),
        Arc::new(Redactor::default()),
    ));
    (session, store)
}

/// model-call `{"model":"x"}`, an artifact holding `b"hello"`, a custom event
pub fn three_step_package() -> EvidencePackage {
    let (session, store) = open_session("three-steps");
    session
        .log_step(StepKind::ModelCall, json!({"model": "x"}), vec![])
        .unwrap();
    session
        .log_step(
            StepKind::ArtifactReference,
            json!({"label": "greeting"}),
            vec![Attachment::binary(b"hello".to_vec())],
        )
        .unwrap();
    session
        .log_step(StepKind::CustomEvent, json!({"event": "done"}), vec![])
        .unwrap();
    epi_evidence::assemble(&session.close(), &store).unwrap()
}

/// Byte offset of `needle` in `haystack`
pub fn find(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("needle not found in archive")
}
