//! Remote conversion job integration tests.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use mp3drop::{
    CancellationToken, ConversionJobApi, JobStatus, RemoteJobTranscoder, StrategyError,
    ToolkitContext, Transcoder, VideoInput,
};

/// Answers `Pending` a fixed number of times, then `final_status`.
struct ScriptedJobs {
    pending_polls: u32,
    final_status: JobStatus,
    key_missing: bool,
    polls: AtomicU32,
    downloads: AtomicU32,
}

impl ScriptedJobs {
    fn new(pending_polls: u32, final_status: JobStatus) -> Arc<Self> {
        Arc::new(Self {
            pending_polls,
            final_status,
            key_missing: false,
            polls: AtomicU32::new(0),
            downloads: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ConversionJobApi for ScriptedJobs {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn probe(&self) -> Result<(), StrategyError> {
        if self.key_missing {
            return Err(StrategyError::Unsupported("scripted API key".to_string()));
        }
        Ok(())
    }

    async fn submit(&self, input: &VideoInput) -> Result<String, StrategyError> {
        Ok(format!("job-{}", input.file_name()))
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, StrategyError> {
        assert_eq!(job_id, "job-clip.mp4");
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if poll <= self.pending_polls {
            Ok(JobStatus::Pending)
        } else {
            Ok(self.final_status.clone())
        }
    }

    async fn download(&self, result_url: &str) -> Result<Vec<u8>, StrategyError> {
        assert_eq!(result_url, "https://files.example.com/clip.mp3");
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0xFF, 0xFB, 0x90, 0x00])
    }
}

fn clip() -> VideoInput {
    VideoInput::new(vec![0_u8; 32], "clip.mp4", "video/mp4")
}

fn done() -> JobStatus {
    JobStatus::Done {
        result_url: "https://files.example.com/clip.mp3".to_string(),
    }
}

// ── Poll loop ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn polls_until_done_then_downloads() {
    let api = ScriptedJobs::new(3, done());
    let transcoder =
        RemoteJobTranscoder::new(api.clone()).with_poll_interval(Duration::from_secs(5));

    let started = tokio::time::Instant::now();
    let bytes = transcoder.transcode(&clip(), &CancellationToken::new()).await.unwrap();

    assert_eq!(bytes, vec![0xFF, 0xFB, 0x90, 0x00]);
    assert_eq!(api.polls.load(Ordering::SeqCst), 4);
    assert_eq!(api.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn failed_job_is_a_transcode_error() {
    let api = ScriptedJobs::new(1, JobStatus::Failed("unsupported codec".to_string()));
    let transcoder = RemoteJobTranscoder::new(api.clone());

    let error = transcoder.transcode(&clip(), &CancellationToken::new()).await.unwrap_err();
    match error {
        StrategyError::Transcode(message) => assert!(message.contains("unsupported codec")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(api.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn job_deadline_stops_polling() {
    let api = ScriptedJobs::new(u32::MAX, done());
    let transcoder = RemoteJobTranscoder::new(api.clone())
        .with_poll_interval(Duration::from_secs(2))
        .with_job_deadline(Duration::from_secs(30));

    let error = transcoder.transcode(&clip(), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(error, StrategyError::TimedOut(limit) if limit == Duration::from_secs(30)));
    assert!(api.polls.load(Ordering::SeqCst) <= 15);
}

#[tokio::test(start_paused = true)]
async fn cancelled_token_stops_before_next_poll() {
    let api = ScriptedJobs::new(u32::MAX, done());
    let transcoder = RemoteJobTranscoder::new(api.clone());
    let token = CancellationToken::new();
    token.cancel();

    let error = transcoder.transcode(&clip(), &token).await.unwrap_err();
    assert!(matches!(error, StrategyError::Cancelled));
    assert_eq!(api.polls.load(Ordering::SeqCst), 0);
}

// ── Toolkit candidate ──────────────────────────────────────────────

#[tokio::test]
async fn candidate_probe_failure_propagates() {
    let api = Arc::new(ScriptedJobs {
        pending_polls: 0,
        final_status: done(),
        key_missing: true,
        polls: AtomicU32::new(0),
        downloads: AtomicU32::new(0),
    });
    let candidate = RemoteJobTranscoder::new(api).into_candidate();
    assert_eq!(candidate.name(), "remote-job (scripted)");

    let context = ToolkitContext::new(vec![candidate]);
    match context.transcoder().await {
        Err(StrategyError::Unsupported(message)) => assert!(message.contains("scripted API key")),
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("candidate should not load"),
    }
    assert!(!context.is_loaded());
}

#[tokio::test(start_paused = true)]
async fn candidate_loads_remote_transcoder() {
    let api = ScriptedJobs::new(0, done());
    let context = ToolkitContext::new(vec![RemoteJobTranscoder::new(api).into_candidate()]);

    let transcoder = context.transcoder().await.unwrap();
    assert_eq!(transcoder.name(), "scripted");
    let bytes = transcoder.transcode(&clip(), &CancellationToken::new()).await.unwrap();
    assert_eq!(bytes.len(), 4);
}
