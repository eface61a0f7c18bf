//! External toolkit loading integration tests.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use mp3drop::{
    CancellationToken, CaptureOptions, ExternalToolkitStrategy, Extracted, ExtractionStrategy,
    ProgressTracker, StrategyContext, StrategyError, ToolkitCandidate, ToolkitContext, Transcoder,
    VideoInput,
};

struct FixedTranscoder {
    name: &'static str,
    output: Vec<u8>,
}

#[async_trait]
impl Transcoder for FixedTranscoder {
    fn name(&self) -> &str {
        self.name
    }

    async fn transcode(
        &self,
        _input: &VideoInput,
        _cancellation: &CancellationToken,
    ) -> Result<Vec<u8>, StrategyError> {
        Ok(self.output.clone())
    }
}

#[derive(Default)]
struct Counters {
    probes: AtomicUsize,
    constructions: AtomicUsize,
}

fn candidate(
    name: &'static str,
    available: bool,
    output: Vec<u8>,
    counters: Arc<Counters>,
) -> ToolkitCandidate {
    let probe_counters = Arc::clone(&counters);
    ToolkitCandidate::new(
        name,
        move || {
            let counters = Arc::clone(&probe_counters);
            async move {
                counters.probes.fetch_add(1, Ordering::SeqCst);
                if available {
                    Ok(())
                } else {
                    Err(StrategyError::Unsupported(format!("{name} binary")))
                }
            }
        },
        move || {
            counters.constructions.fetch_add(1, Ordering::SeqCst);
            Arc::new(FixedTranscoder {
                name,
                output: output.clone(),
            }) as Arc<dyn Transcoder>
        },
    )
}

fn context() -> StrategyContext {
    StrategyContext::new(Arc::new(ProgressTracker::silent()), CaptureOptions::new())
}

fn clip() -> VideoInput {
    VideoInput::new(vec![0_u8; 16], "clip.webm", "video/webm")
}

// ── Candidate selection ────────────────────────────────────────────

#[tokio::test]
async fn first_working_candidate_is_loaded_once() {
    let broken = Arc::new(Counters::default());
    let working = Arc::new(Counters::default());
    let toolkit = ToolkitContext::new(vec![
        candidate("wasm", false, vec![1], Arc::clone(&broken)),
        candidate("native", true, vec![2], Arc::clone(&working)),
    ]);
    assert_eq!(toolkit.candidate_names(), vec!["wasm", "native"]);
    assert!(!toolkit.is_loaded());

    for _ in 0..3 {
        let transcoder = toolkit.transcoder().await.unwrap();
        assert_eq!(transcoder.name(), "native");
    }

    assert!(toolkit.is_loaded());
    assert_eq!(broken.probes.load(Ordering::SeqCst), 1);
    assert_eq!(broken.constructions.load(Ordering::SeqCst), 0);
    assert_eq!(working.probes.load(Ordering::SeqCst), 1);
    assert_eq!(working.constructions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_load_lists_causes_and_is_retried() {
    let first = Arc::new(Counters::default());
    let second = Arc::new(Counters::default());
    let toolkit = ToolkitContext::new(vec![
        candidate("wasm", false, vec![], Arc::clone(&first)),
        candidate("native", false, vec![], Arc::clone(&second)),
    ]);

    for expected_probes in 1..=2 {
        match toolkit.transcoder().await {
            Err(StrategyError::Unsupported(message)) => {
                assert!(message.contains("wasm: wasm binary is not available"));
                assert!(message.contains("native: native binary is not available"));
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("no candidate should load"),
        }
        assert_eq!(first.probes.load(Ordering::SeqCst), expected_probes);
        assert_eq!(second.probes.load(Ordering::SeqCst), expected_probes);
    }
    assert!(!toolkit.is_loaded());
}

#[tokio::test]
async fn empty_context_is_unsupported() {
    let toolkit = ToolkitContext::new(Vec::new());
    assert!(matches!(toolkit.transcoder().await, Err(StrategyError::Unsupported(_))));
}

// ── Strategy ───────────────────────────────────────────────────────

#[tokio::test]
async fn strategy_returns_finished_mp3() {
    let toolkit = Arc::new(ToolkitContext::new(vec![candidate(
        "native",
        true,
        vec![0xFF, 0xFB, 0x10],
        Arc::default(),
    )]));
    let strategy = ExternalToolkitStrategy::new(toolkit);

    assert_eq!(strategy.name(), ExternalToolkitStrategy::NAME);
    strategy.probe().await.unwrap();
    let extracted = strategy.extract(&clip(), &context()).await.unwrap();
    assert_eq!(extracted, Extracted::Mp3(vec![0xFF, 0xFB, 0x10]));
}

#[tokio::test]
async fn empty_transcode_output_is_an_error() {
    let native = candidate("native", true, Vec::new(), Arc::default());
    let toolkit = Arc::new(ToolkitContext::new(vec![native]));
    let strategy = ExternalToolkitStrategy::new(toolkit);

    let error = strategy.extract(&clip(), &context()).await.unwrap_err();
    assert!(matches!(error, StrategyError::Transcode(message) if message.contains("empty file")));
}

#[tokio::test]
async fn strategy_probe_fails_without_toolkit() {
    let native = candidate("native", false, Vec::new(), Arc::default());
    let toolkit = Arc::new(ToolkitContext::new(vec![native]));
    let strategy = ExternalToolkitStrategy::new(toolkit);
    assert!(strategy.probe().await.is_err());
}
