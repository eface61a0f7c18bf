//! Strategy selection integration tests.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use mp3drop::{
    AudioBuffer, CaptureOptions, ExtractionError, ExtractionStrategy, Extracted, FallbackChain,
    ProgressEvent, ProgressSink, ProgressTracker, StrategyContext, StrategyError, StrategySelector,
    VideoInput,
};

#[derive(Clone, Copy)]
enum Behaviour {
    ProbeFails,
    ExtractFails,
    Succeeds,
    Hangs,
}

struct FakeStrategy {
    name: &'static str,
    behaviour: Behaviour,
    probes: AtomicUsize,
    extracts: AtomicUsize,
    saw_cancel: Arc<Mutex<Option<mp3drop::CancellationToken>>>,
}

impl FakeStrategy {
    fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name,
            behaviour,
            probes: AtomicUsize::new(0),
            extracts: AtomicUsize::new(0),
            saw_cancel: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait]
impl ExtractionStrategy for FakeStrategy {
    fn name(&self) -> &str {
        self.name
    }

    async fn probe(&self) -> Result<(), StrategyError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::ProbeFails => Err(StrategyError::Unsupported("capture API".to_string())),
            _ => Ok(()),
        }
    }

    async fn extract(
        &self,
        _input: &VideoInput,
        context: &StrategyContext,
    ) -> Result<Extracted, StrategyError> {
        self.extracts.fetch_add(1, Ordering::SeqCst);
        *self.saw_cancel.lock().unwrap() = Some(context.cancellation.clone());
        context.report(1, 2, format!("{} halfway", self.name));
        match self.behaviour {
            Behaviour::ExtractFails => {
                Err(StrategyError::Decode(format!("{} cannot decode", self.name)))
            }
            Behaviour::Succeeds => {
                Ok(Extracted::Pcm(AudioBuffer::mono(44_100, vec![0.0; 64]).unwrap()))
            }
            Behaviour::Hangs => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(StrategyError::Record("woke up".to_string()))
            }
            Behaviour::ProbeFails => unreachable!("probe failed"),
        }
    }
}

#[derive(Default)]
struct Collect(Mutex<Vec<ProgressEvent>>);

impl ProgressSink for Collect {
    fn on_progress(&self, event: &ProgressEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

fn input() -> VideoInput {
    VideoInput::new(vec![1_u8, 2, 3], "clip.mp4", "video/mp4")
}

fn context() -> (StrategyContext, Arc<Collect>) {
    let sink = Arc::new(Collect::default());
    let tracker = Arc::new(ProgressTracker::new(sink.clone()));
    (StrategyContext::new(tracker, CaptureOptions::new()), sink)
}

fn selector(strategies: &[Arc<FakeStrategy>]) -> StrategySelector {
    strategies.iter().fold(StrategySelector::new(), |selector, strategy| {
        selector.with_strategy(Arc::clone(strategy) as Arc<dyn ExtractionStrategy>)
    })
}

// ── Ordering ───────────────────────────────────────────────────────

#[tokio::test]
async fn first_fails_second_wins_third_untouched() {
    let first = FakeStrategy::new("capture", Behaviour::ProbeFails);
    let second = FakeStrategy::new("container", Behaviour::Succeeds);
    let third = FakeStrategy::new("toolkit", Behaviour::Succeeds);
    let (context, _) = context();

    let selection = selector(&[first.clone(), second.clone(), third.clone()])
        .select(&input(), &context)
        .await
        .unwrap();

    assert_eq!(selection.strategy, "container");
    assert_eq!(selection.attempted, vec!["capture", "container"]);
    assert!(matches!(selection.extracted, Extracted::Pcm(_)));
    assert_eq!(first.probes.load(Ordering::SeqCst), 1);
    assert_eq!(first.extracts.load(Ordering::SeqCst), 0);
    assert_eq!(second.extracts.load(Ordering::SeqCst), 1);
    assert_eq!(third.probes.load(Ordering::SeqCst), 0);
    assert_eq!(third.extracts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exhaustion_reports_last_cause() {
    let strategies = [
        FakeStrategy::new("capture", Behaviour::ProbeFails),
        FakeStrategy::new("container", Behaviour::ExtractFails),
        FakeStrategy::new("toolkit", Behaviour::ExtractFails),
    ];
    let (context, _) = context();

    let error = selector(&strategies).select(&input(), &context).await.unwrap_err();
    match &error {
        ExtractionError::Exhausted { attempted, last } => {
            assert_eq!(attempted, &vec!["capture", "container", "toolkit"]);
            assert!(last.to_string().contains("toolkit cannot decode"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(error.to_string().contains("capture -> container -> toolkit"));
}

#[tokio::test]
async fn empty_selector_has_no_strategies() {
    let (context, _) = context();
    let error = StrategySelector::new().select(&input(), &context).await.unwrap_err();
    assert!(matches!(error, ExtractionError::NoStrategies));
}

// ── Deadlines ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn strategy_timeout_cancels_and_falls_back() {
    let slow = FakeStrategy::new("capture", Behaviour::Hangs);
    let fallback = FakeStrategy::new("container", Behaviour::Succeeds);
    let (context, _) = context();

    let selection = selector(&[slow.clone(), fallback.clone()])
        .with_strategy_timeout(Some(Duration::from_secs(5)))
        .select(&input(), &context)
        .await
        .unwrap();

    assert_eq!(selection.strategy, "container");
    let token = slow.saw_cancel.lock().unwrap().clone().unwrap();
    assert!(token.is_cancelled(), "timed-out attempt must be cancelled");
    let token = fallback.saw_cancel.lock().unwrap().clone().unwrap();
    assert!(!token.is_cancelled(), "winning attempt keeps its token");
}

// ── Progress ───────────────────────────────────────────────────────

#[tokio::test]
async fn progress_floor_resets_between_strategies() {
    let strategies = [
        FakeStrategy::new("capture", Behaviour::ExtractFails),
        FakeStrategy::new("container", Behaviour::Succeeds),
    ];
    let (context, sink) = context();

    selector(&strategies).select(&input(), &context).await.unwrap();

    let events = sink.0.lock().unwrap();
    let messages: Vec<&str> = events.iter().map(|event| event.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "Extracting audio (capture)",
            "capture halfway",
            "Extracting audio (container)",
            "container halfway",
        ]
    );
    let percents: Vec<u8> = events.iter().map(|event| event.percent).collect();
    assert_eq!(percents, vec![10, 30, 10, 30]);
}

// ── FallbackChain ──────────────────────────────────────────────────

#[tokio::test]
async fn chain_calls_on_failure_only_between_links() {
    let chain = FallbackChain::new().with("a", 1).with("b", 2).with("c", 3);
    let mut hooks = Vec::new();

    let result: Result<(i32, _), _> = chain
        .run(
            |value| async move {
                if value == 3 {
                    Ok(value * 10)
                } else {
                    Err(format!("no {value}"))
                }
            },
            |name, error: &String| hooks.push(format!("{name}: {error}")),
        )
        .await;

    let (value, trace) = result.unwrap();
    assert_eq!(value, 30);
    assert_eq!(trace.attempted, vec!["a", "b", "c"]);
    assert_eq!(hooks, vec!["a: no 1", "b: no 2"]);
}

#[tokio::test]
async fn chain_exhaustion_keeps_every_failure() {
    let chain: FallbackChain<u8> = ["x", "y"]
        .into_iter()
        .map(|name| (name.to_string(), 0))
        .collect();
    let mut hooks = 0;

    let trace = chain
        .run(|_| async { Err::<(), _>("down".to_string()) }, |_, _| hooks += 1)
        .await
        .unwrap_err();

    assert_eq!(hooks, 1);
    assert_eq!(trace.failures.len(), 2);
    let (attempted, last) = trace.into_last();
    assert_eq!(attempted, vec!["x", "y"]);
    assert_eq!(last.as_deref(), Some("down"));
}
