//! Concurrent logging into one session
//!
//! Many threads share one `SessionHandle`. Sequence numbers must come out
//! gapless and unique, redaction must hold on every path, and appends that
//! race with `close` must either land in the package or be rejected.

mod fixtures;

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use epi_evidence::{verify::verify_bytes, Attachment, SessionError, StepKind, TrustLevel};
use fixtures::open_session;
use serde_json::json;

const THREADS: usize = 8;
const STEPS_PER_THREAD: usize = 25;
const SECRET: &str = "sk-ant-REDACTED";

// === Sequencing ===

#[test]
fn test_concurrent_appends_are_gapless() {
    let (session, store) = open_session("parallel");
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..STEPS_PER_THREAD)
                    .map(|i| {
                        session
                            .log_step(StepKind::CustomEvent, json!({"thread": t, "i": i}), vec![])
                            .unwrap()
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    for handle in handles {
        let seqs = handle.join().unwrap();
        // Each thread observes its own appends in increasing order.
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        seen.extend(seqs);
    }

    let total = (THREADS * STEPS_PER_THREAD) as u64;
    assert_eq!(seen, (1..=total).collect::<BTreeSet<u64>>());

    let closed = session.close();
    let seqs: Vec<u64> = closed.steps.iter().map(|s| s.seq).collect();
    assert_eq!(seqs, (1..=total).collect::<Vec<u64>>());

    let package = epi_evidence::assemble(&closed, &store).unwrap();
    assert_eq!(package.manifest().step_count, total);
    assert_eq!(verify_bytes(&package.to_bytes().unwrap(), None).trust, TrustLevel::Medium);
}

#[test]
fn test_appends_racing_close() {
    let (session, store) = open_session("race");
    let barrier = Arc::new(Barrier::new(THREADS + 1));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut accepted = 0u64;
                for i in 0..STEPS_PER_THREAD {
                    match session.log_step(StepKind::CustomEvent, json!({"thread": t, "i": i}), vec![]) {
                        Ok(_) => accepted += 1,
                        Err(SessionError::SessionClosed) => {}
                        Err(other) => panic!("unexpected error: {}", other),
                    }
                }
                accepted
            })
        })
        .collect();

    barrier.wait();
    let closed = session.close();
    let accepted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(closed.steps.len() as u64, accepted);
    for (i, step) in closed.steps.iter().enumerate() {
        assert_eq!(step.seq, i as u64 + 1);
    }

    let package = epi_evidence::assemble(&closed, &store).unwrap();
    assert_eq!(package.manifest().step_count, accepted);
}

// === Redaction ===

#[test]
fn test_secret_never_reaches_package_under_concurrency() {
    let (session, store) = open_session("redaction");

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for i in 0..STEPS_PER_THREAD {
                    session
                        .log_step(
                            StepKind::ModelCall,
                            json!({
                                "thread": t,
                                "i": i,
                                "api_key": SECRET,
                                "prompt": format!("use {} for this call", SECRET),
                            }),
                            vec![Attachment::text(format!("Authorization: Bearer {}", SECRET))],
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let closed = session.close();
    assert!(closed.steps.iter().all(|s| !s.redactions.is_empty()));

    let package = epi_evidence::assemble(&closed, &store)
        .unwrap()
        .with_compression(epi_evidence::package::Compression::Stored);
    let bytes = package.to_bytes().unwrap();
    let needle = SECRET.as_bytes();
    assert!(!bytes.windows(needle.len()).any(|w| w == needle));
    for content in package.artifacts().values() {
        assert!(!content.windows(needle.len()).any(|w| w == needle));
    }
}
